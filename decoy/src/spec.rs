use std::collections::BTreeMap;
use std::fmt;

use crate::args::Args;
use crate::value::Value;

/// Immutable description of a mockable surface.
///
/// A spec carries a display name, an optional callable [`Signature`], an
/// asyncness flag, and the child attributes of a class-shaped surface.
/// Specs are declared with a builder and frozen when handed to
/// [`Decoy::mock`](crate::Decoy::mock):
///
/// ```
/// use decoy::{Signature, Spec};
///
/// // A free function: fn add(a, b)
/// let add = Spec::function("add").param("a").param("b");
///
/// // A class with methods and a property
/// let database = Spec::class("Database")
///     .method("exists", Signature::new().param("id"))
///     .async_method("fetch", Signature::new().param("id"))
///     .property("connection_count");
///
/// // A bare mock: no signature, any arguments accepted
/// let anything = Spec::name("anything");
/// # let _ = (add, database, anything);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    name: String,
    kind: SpecKind,
    signature: Option<Signature>,
    is_async: bool,
    ignore_extra_args: bool,
    children: Vec<(String, Spec)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecKind {
    Function,
    Class,
    Bare,
}

impl Spec {
    /// Declares a function-shaped spec with an empty signature.
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpecKind::Function,
            signature: Some(Signature::new()),
            is_async: false,
            ignore_extra_args: false,
            children: Vec::new(),
        }
    }

    /// Declares a class-shaped spec; add surfaces with [`method`](Self::method),
    /// [`async_method`](Self::async_method), and [`property`](Self::property).
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpecKind::Class,
            signature: None,
            is_async: false,
            ignore_extra_args: false,
            children: Vec::new(),
        }
    }

    /// Declares a bare spec: no signature, calls accepted with any arguments.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpecKind::Bare,
            signature: None,
            is_async: false,
            ignore_extra_args: false,
            children: Vec::new(),
        }
    }

    /// Appends a positional-or-keyword parameter to the signature.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.edit_signature(|sig| sig.add_param(name.into(), ParamKind::Positional, None));
        self
    }

    /// Appends a positional-or-keyword parameter with a default value.
    ///
    /// Defaults satisfy arity during binding but are never substituted into
    /// the bound arguments, so `m(1)` and `m(1, 2)` stay distinguishable.
    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.edit_signature(|sig| {
            sig.add_param(name.into(), ParamKind::Positional, Some(default.into()));
        });
        self
    }

    /// Appends a keyword-only parameter.
    pub fn keyword_only(mut self, name: impl Into<String>) -> Self {
        self.edit_signature(|sig| sig.add_param(name.into(), ParamKind::KeywordOnly, None));
        self
    }

    /// Appends a keyword-only parameter with a default value.
    pub fn keyword_only_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.edit_signature(|sig| {
            sig.add_param(name.into(), ParamKind::KeywordOnly, Some(default.into()));
        });
        self
    }

    /// Declares a variadic positional catch-all (`*args`).
    pub fn var_args(mut self, name: impl Into<String>) -> Self {
        self.edit_signature(|sig| sig.var_args = Some(name.into()));
        self
    }

    /// Declares a variadic keyword catch-all (`**kwargs`).
    pub fn var_kwargs(mut self, name: impl Into<String>) -> Self {
        self.edit_signature(|sig| sig.var_kwargs = Some(name.into()));
        self
    }

    /// Marks the spec as an asynchronous callable.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Makes `ignore_extra_args` the default for rehearsals against spies
    /// built from this spec.
    pub fn ignoring_extra_args(mut self) -> Self {
        self.ignore_extra_args = true;
        self
    }

    /// Declares a synchronous method on a class spec.
    pub fn method(mut self, name: impl Into<String>, signature: Signature) -> Self {
        let name = name.into();
        let child = Spec {
            name: name.clone(),
            kind: SpecKind::Function,
            signature: Some(signature),
            is_async: false,
            ignore_extra_args: false,
            children: Vec::new(),
        };
        self.children.push((name, child));
        self
    }

    /// Declares an asynchronous method on a class spec.
    pub fn async_method(mut self, name: impl Into<String>, signature: Signature) -> Self {
        let name = name.into();
        let child = Spec {
            name: name.clone(),
            kind: SpecKind::Function,
            signature: Some(signature),
            is_async: true,
            ignore_extra_args: false,
            children: Vec::new(),
        };
        self.children.push((name, child));
        self
    }

    /// Declares a property-like attribute on a class spec.
    pub fn property(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.children.push((name.clone(), Spec::name(name)));
        self
    }

    fn edit_signature(&mut self, edit: impl FnOnce(&mut Signature)) {
        edit(self.signature.get_or_insert_with(Signature::new));
    }

    /// Returns the spec's display name.
    #[inline]
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Returns the callable signature, if the spec represents a callable.
    #[inline]
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Returns whether the spec is an asynchronous callable.
    #[inline]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    #[inline]
    pub(crate) fn ignore_extra_args(&self) -> bool {
        self.ignore_extra_args
    }

    /// Returns the child spec for `attr`: the declared one, or a bare spec
    /// materialised on demand so every attribute is navigable.
    pub(crate) fn child_spec(&self, attr: &str) -> Spec {
        self.children
            .iter()
            .find(|(name, _)| name == attr)
            .map(|(_, child)| child.clone())
            .unwrap_or_else(|| Spec::name(attr))
    }

    /// Checks the declaration for contradictions. Violations surface as
    /// [`Error::MockSpecInvalid`](crate::Error::MockSpecInvalid) from `mock`.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("mock name must not be empty".to_owned());
        }
        match self.kind {
            SpecKind::Class => {
                if self.is_async {
                    return Err(format!(
                        "class spec '{}' cannot be asynchronous; mark individual methods instead",
                        self.name
                    ));
                }
                if self.signature.is_some() {
                    return Err(format!(
                        "class spec '{}' takes methods, not parameters",
                        self.name
                    ));
                }
            }
            SpecKind::Bare => {
                if self.signature.is_some() {
                    return Err(format!(
                        "bare spec '{}' cannot declare parameters",
                        self.name
                    ));
                }
            }
            SpecKind::Function => {}
        }

        let mut seen = BTreeMap::new();
        for (name, child) in &self.children {
            if seen.insert(name.clone(), ()).is_some() {
                return Err(format!(
                    "spec '{}' declares attribute '{}' more than once",
                    self.name, name
                ));
            }
            child.validate()?;
        }

        if let Some(signature) = &self.signature {
            signature.validate(&self.name)?;
        }

        Ok(())
    }
}

/// The callable signature of a function or method spec.
///
/// Parameter order is declaration order; keyword-only parameters must come
/// after all positional ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    params: Vec<Param>,
    var_args: Option<String>,
    var_kwargs: Option<String>,
    defect: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Param {
    name: String,
    kind: ParamKind,
    default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Positional,
    KeywordOnly,
}

impl Signature {
    /// Creates an empty signature (a callable of no arguments).
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional-or-keyword parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.add_param(name.into(), ParamKind::Positional, None);
        self
    }

    /// Appends a positional-or-keyword parameter with a default value.
    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.add_param(name.into(), ParamKind::Positional, Some(default.into()));
        self
    }

    /// Appends a keyword-only parameter.
    pub fn keyword_only(mut self, name: impl Into<String>) -> Self {
        self.add_param(name.into(), ParamKind::KeywordOnly, None);
        self
    }

    /// Appends a keyword-only parameter with a default value.
    pub fn keyword_only_with_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.add_param(name.into(), ParamKind::KeywordOnly, Some(default.into()));
        self
    }

    /// Declares a variadic positional catch-all (`*args`).
    pub fn var_args(mut self, name: impl Into<String>) -> Self {
        self.var_args = Some(name.into());
        self
    }

    /// Declares a variadic keyword catch-all (`**kwargs`).
    pub fn var_kwargs(mut self, name: impl Into<String>) -> Self {
        self.var_kwargs = Some(name.into());
        self
    }

    fn add_param(&mut self, name: String, kind: ParamKind, default: Option<Value>) {
        if self.var_args.is_some() && kind == ParamKind::Positional {
            self.defect = Some(format!(
                "positional parameter '{name}' declared after the variadic catch-all"
            ));
        }
        self.params.push(Param {
            name,
            kind,
            default,
        });
    }

    fn validate(&self, spec_name: &str) -> Result<(), String> {
        if let Some(defect) = &self.defect {
            return Err(format!("spec '{spec_name}': {defect}"));
        }

        let mut seen = BTreeMap::new();
        let mut keyword_only_seen = false;
        for param in &self.params {
            if seen.insert(param.name.clone(), ()).is_some() {
                return Err(format!(
                    "spec '{spec_name}' declares parameter '{}' more than once",
                    param.name
                ));
            }
            match param.kind {
                ParamKind::KeywordOnly => keyword_only_seen = true,
                ParamKind::Positional if keyword_only_seen => {
                    return Err(format!(
                        "spec '{spec_name}': positional parameter '{}' declared after a keyword-only parameter",
                        param.name
                    ));
                }
                ParamKind::Positional => {}
            }
        }

        Ok(())
    }

    /// Binds `args` to this signature and canonicalises them.
    ///
    /// Positional-or-keyword parameters supplied by keyword are folded back
    /// into the positional list, up to the first unfilled parameter, so
    /// `m(1, b=2)` and `m(1, 2)` compare equal. Failures describe the
    /// mismatch and leave the caller to decide severity.
    pub(crate) fn bind(&self, args: &Args) -> Result<Args, String> {
        let positional_params: Vec<&Param> = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .collect();

        let mut bound: Vec<Option<Value>> = vec![None; self.params.len()];
        let mut extra_positional: Vec<Value> = Vec::new();

        for (i, value) in args.positional().iter().enumerate() {
            if i < positional_params.len() {
                let index = self.index_of(&positional_params[i].name);
                bound[index] = Some(value.clone());
            } else if self.var_args.is_some() {
                extra_positional.push(value.clone());
            } else {
                return Err(format!(
                    "takes {} positional argument{} but {} were given",
                    positional_params.len(),
                    if positional_params.len() == 1 { "" } else { "s" },
                    args.positional().len()
                ));
            }
        }

        let mut extra_keywords: BTreeMap<String, Value> = BTreeMap::new();
        for (key, value) in args.keywords() {
            if let Some(index) = self.params.iter().position(|p| &p.name == key) {
                if bound[index].is_some() {
                    return Err(format!("got multiple values for argument '{key}'"));
                }
                bound[index] = Some(value.clone());
            } else if self.var_kwargs.is_some() {
                extra_keywords.insert(key.clone(), value.clone());
            } else {
                return Err(format!("got an unexpected keyword argument '{key}'"));
            }
        }

        for (param, slot) in self.params.iter().zip(bound.iter()) {
            if slot.is_none() && param.default.is_none() {
                return Err(format!("missing required argument '{}'", param.name));
            }
        }

        // Canonical form: walk the positional parameters in order, keeping
        // values positional until the first unfilled slot; everything bound
        // after a gap stays keyword.
        let mut out_positional = Vec::new();
        let mut out_keywords = BTreeMap::new();
        let mut still_positional = true;
        for param in &positional_params {
            let index = self.index_of(&param.name);
            match (bound[index].take(), still_positional) {
                (Some(value), true) => out_positional.push(value),
                (Some(value), false) => {
                    out_keywords.insert(param.name.clone(), value);
                }
                (None, _) => still_positional = false,
            }
        }
        out_positional.extend(extra_positional);

        for param in self.params.iter().filter(|p| p.kind == ParamKind::KeywordOnly) {
            let index = self.index_of(&param.name);
            if let Some(value) = bound[index].take() {
                out_keywords.insert(param.name.clone(), value);
            }
        }
        out_keywords.extend(extra_keywords);

        Ok(Args::from_parts(out_positional, out_keywords))
    }

    fn index_of(&self, name: &str) -> usize {
        self.params
            .iter()
            .position(|p| p.name == name)
            .unwrap_or(self.params.len())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pieces: Vec<String> = Vec::new();
        let render_param = |param: &Param| match &param.default {
            Some(default) => format!("{}={default}", param.name),
            None => param.name.clone(),
        };

        for param in self.params.iter().filter(|p| p.kind == ParamKind::Positional) {
            pieces.push(render_param(param));
        }
        let keyword_only: Vec<&Param> = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::KeywordOnly)
            .collect();
        match &self.var_args {
            Some(name) => pieces.push(format!("*{name}")),
            None if !keyword_only.is_empty() => pieces.push("*".to_owned()),
            None => {}
        }
        for param in keyword_only {
            pieces.push(render_param(param));
        }
        if let Some(name) = &self.var_kwargs {
            pieces.push(format!("**{name}"));
        }

        write!(f, "({})", pieces.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[test]
    fn keyword_supplied_positionals_fold_into_position() {
        let signature = Signature::new().param("a").param("b");
        let bound = signature.bind(&args![1; "b" => 2]).unwrap();
        assert_eq!(bound, args![1, 2]);
        assert_eq!(signature.bind(&args![1, 2]).unwrap(), args![1, 2]);
    }

    #[test]
    fn gapped_keywords_stay_keyword() {
        let signature = Signature::new()
            .param("a")
            .param_with_default("b", 0)
            .param("c");
        let bound = signature.bind(&args![1; "c" => 3]).unwrap();
        assert_eq!(bound, args![1; "c" => 3]);
    }

    #[test]
    fn defaults_satisfy_arity_but_are_not_substituted() {
        let signature = Signature::new().param("a").param_with_default("b", 2);
        let one = signature.bind(&args![1]).unwrap();
        let two = signature.bind(&args![1, 2]).unwrap();
        assert_eq!(one, args![1]);
        assert_eq!(two, args![1, 2]);
        assert_ne!(one, two);
    }

    #[test]
    fn missing_required_argument_fails() {
        let signature = Signature::new().param("a").param("b");
        let error = signature.bind(&args![1]).unwrap_err();
        assert!(error.contains("missing required argument 'b'"), "{error}");
    }

    #[test]
    fn too_many_positionals_fails_without_var_args() {
        let signature = Signature::new().param("a");
        let error = signature.bind(&args![1, 2]).unwrap_err();
        assert!(error.contains("positional argument"), "{error}");
    }

    #[test]
    fn var_args_absorbs_extra_positionals() {
        let signature = Signature::new().param("a").var_args("rest");
        let bound = signature.bind(&args![1, 2, 3]).unwrap();
        assert_eq!(bound, args![1, 2, 3]);
    }

    #[test]
    fn var_kwargs_absorbs_unknown_keywords() {
        let signature = Signature::new().param("a").var_kwargs("extra");
        let bound = signature.bind(&args![1; "x" => 9]).unwrap();
        assert_eq!(bound, args![1; "x" => 9]);
    }

    #[test]
    fn unknown_keyword_fails_without_var_kwargs() {
        let signature = Signature::new().param("a");
        let error = signature.bind(&args![1; "x" => 9]).unwrap_err();
        assert!(error.contains("unexpected keyword argument 'x'"), "{error}");
    }

    #[test]
    fn duplicate_binding_fails() {
        let signature = Signature::new().param("a");
        let error = signature.bind(&args![1; "a" => 1]).unwrap_err();
        assert!(error.contains("multiple values"), "{error}");
    }

    #[test]
    fn keyword_only_params_never_bind_positionally() {
        let signature = Signature::new().param("a").keyword_only("flag");
        let bound = signature.bind(&args![1; "flag" => true]).unwrap();
        assert_eq!(bound, args![1; "flag" => true]);
        assert!(signature.bind(&args![1, true]).is_err());
    }

    #[test]
    fn class_spec_children_are_found_by_name() {
        let spec = Spec::class("Database")
            .method("exists", Signature::new().param("id"))
            .property("count");
        assert_eq!(spec.child_spec("exists").display_name(), "exists");
        assert!(spec.child_spec("exists").signature().is_some());
        assert!(spec.child_spec("count").signature().is_none());
        // Undeclared attributes materialise as bare specs.
        assert!(spec.child_spec("anything").signature().is_none());
    }

    #[test]
    fn async_methods_carry_the_flag() {
        let spec = Spec::class("Client").async_method("fetch", Signature::new().param("id"));
        assert!(spec.child_spec("fetch").is_async());
        assert!(!spec.child_spec("other").is_async());
    }

    #[test]
    fn validation_rejects_contradictions() {
        assert!(Spec::function("").validate().is_err());
        assert!(Spec::class("C").asynchronous().validate().is_err());
        assert!(Spec::name("n").param("a").validate().is_err());
        assert!(Spec::function("f").param("a").param("a").validate().is_err());
        assert!(Spec::class("C")
            .property("x")
            .property("x")
            .validate()
            .is_err());
        assert!(Spec::function("f")
            .var_args("rest")
            .param("late")
            .validate()
            .is_err());
        assert!(Spec::function("f")
            .keyword_only("k")
            .param("late")
            .validate()
            .is_err());
        assert!(Spec::function("f").param("a").validate().is_ok());
    }

    #[test]
    fn signature_display_shows_shape() {
        let signature = Signature::new()
            .param("a")
            .param_with_default("b", 2)
            .var_args("rest")
            .keyword_only("flag")
            .var_kwargs("extra");
        assert_eq!(signature.to_string(), "(a, b=2, *rest, flag, **extra)");
    }
}
