use decoy::{args, matchers, Decoy, Signature, Spec, Value};

// The "code under test": looks an order up and logs what it did.
fn describe_order(db: &decoy::Spy, logger: &decoy::Spy, id: &str) -> decoy::Result<String> {
    let found = db.child("exists").call(args![id])?;
    let message = if found == Value::Bool(true) {
        format!("order {id} is on file")
    } else {
        format!("order {id} is unknown")
    };
    logger.call(args![message.as_str()])?;
    Ok(message)
}

fn main() -> decoy::Result {
    let decoy = Decoy::new();

    let db = decoy.mock(Spec::class("Database").method("exists", Signature::new().param("id")))?;
    let logger = decoy.mock(Spec::function("log").param("msg"))?;

    // Stub: rehearse the call the subject will make.
    decoy
        .when(&db.child("exists"))?
        .called_with(args!["order-1"])
        .then_return(true)?;

    let message = describe_order(&db, &logger, "order-1")?;
    println!("subject said: {message}");

    let unknown = describe_order(&db, &logger, "order-2")?;
    println!("subject said: {unknown}");

    // Verify the side effect, capturing the logged text.
    let captor = matchers::Captor::new();
    decoy.verify(&logger)?.times(2).called_with(args![captor.clone()])?;
    println!("logged: {:?}", captor.values());

    // Teardown surfaces anything suspicious the test set up but never used.
    for warning in decoy.reset() {
        println!("warning: {warning}");
    }
    Ok(())
}
