use std::fmt;
use std::sync::Arc;

use crate::args::Args;

/// Identifier of a spy within its owning [`Decoy`](crate::Decoy) container.
///
/// Spies live in an arena owned by the container; the id is the arena index.
/// Child spies get their own ids, so records always name the exact surface
/// that was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SpyId(usize);

impl SpyId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SpyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock#{}", self.0)
    }
}

/// The kind of a recorded spy interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// The spy was called as a function or method.
    Call,
    /// An attribute was read through the attribute-stub API.
    Get,
    /// An attribute was assigned.
    Set,
    /// An attribute was deleted.
    Delete,
    /// The spy (or a synthesised context manager) was entered.
    Enter,
    /// The spy (or a synthesised context manager) was exited.
    Exit,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionKind::Call => "call",
            InteractionKind::Get => "get",
            InteractionKind::Set => "set",
            InteractionKind::Delete => "delete",
            InteractionKind::Enter => "enter",
            InteractionKind::Exit => "exit",
        };
        write!(f, "{name}")
    }
}

/// An immutable record of one interaction with a spy.
///
/// Records are appended to the container-wide interaction log; the sequence
/// number is allocated by the container and is the sole source of truth for
/// ordering. The entry-counter value is captured at record time so that
/// `is_entered` conditions can be checked long after the fact.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    spy: SpyId,
    spy_name: Arc<str>,
    kind: InteractionKind,
    args: Args,
    entered: u32,
    sequence: u64,
}

impl CallRecord {
    pub(crate) fn new(
        spy: SpyId,
        spy_name: Arc<str>,
        kind: InteractionKind,
        args: Args,
        entered: u32,
        sequence: u64,
    ) -> Self {
        Self {
            spy,
            spy_name,
            kind,
            args,
            entered,
            sequence,
        }
    }

    /// Returns the id of the spy that was interacted with.
    #[inline]
    pub fn spy(&self) -> SpyId {
        self.spy
    }

    /// Returns the full name of the spy, e.g. `Database.exists`.
    #[inline]
    pub fn spy_name(&self) -> &str {
        &self.spy_name
    }

    /// Returns the interaction kind.
    #[inline]
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// Returns the canonicalised arguments of the interaction.
    #[inline]
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Returns the spy's context-manager entry depth at record time.
    #[inline]
    pub fn entered(&self) -> u32 {
        self.entered
    }

    /// Returns the container-wide sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(&self.spy_name, self.kind, &self.args))
    }
}

/// Renders an interaction the way error listings and warnings show it.
pub(crate) fn render(name: &str, kind: InteractionKind, args: &Args) -> String {
    match kind {
        InteractionKind::Call => format!("{name}{args}"),
        InteractionKind::Get => name.to_owned(),
        InteractionKind::Set => match args.positional().first() {
            Some(value) => format!("{name} = {value}"),
            None => format!("{name} = ?"),
        },
        InteractionKind::Delete => format!("del {name}"),
        InteractionKind::Enter => format!("{name} (enter)"),
        InteractionKind::Exit => format!("{name} (exit)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn make_record(kind: InteractionKind, args: Args) -> CallRecord {
        CallRecord::new(SpyId::new(0), Arc::from("db.exists"), kind, args, 0, 1)
    }

    #[test]
    fn accessors_return_fields() {
        let record = make_record(InteractionKind::Call, args![1, 2]);
        assert_eq!(record.spy(), SpyId::new(0));
        assert_eq!(record.spy_name(), "db.exists");
        assert_eq!(record.kind(), InteractionKind::Call);
        assert_eq!(record.args(), &args![1, 2]);
        assert_eq!(record.entered(), 0);
        assert_eq!(record.sequence(), 1);
    }

    #[test]
    fn call_records_render_as_calls() {
        let record = make_record(InteractionKind::Call, args![1; "x" => 2]);
        assert_eq!(record.to_string(), "db.exists(1, x=2)");
    }

    #[test]
    fn attribute_records_render_by_kind() {
        assert_eq!(
            make_record(InteractionKind::Get, args![]).to_string(),
            "db.exists"
        );
        assert_eq!(
            make_record(InteractionKind::Set, args![5]).to_string(),
            "db.exists = 5"
        );
        assert_eq!(
            make_record(InteractionKind::Delete, args![]).to_string(),
            "del db.exists"
        );
    }

    #[test]
    fn context_records_render_direction() {
        assert_eq!(
            make_record(InteractionKind::Enter, args![]).to_string(),
            "db.exists (enter)"
        );
        assert_eq!(
            make_record(InteractionKind::Exit, args![]).to_string(),
            "db.exists (exit)"
        );
    }
}
