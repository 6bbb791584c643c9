use decoy::{args, Decoy, Spec, Value};

// The "code under test": awaits a client call and unwraps the payload.
async fn fetch_name(client: &decoy::Spy, id: &str) -> decoy::Result<Value> {
    client.call_async(args![id]).await
}

#[tokio::main]
async fn main() -> decoy::Result {
    let decoy = Decoy::new();
    let client = decoy.mock(Spec::function("fetch").param("id").asynchronous())?;

    // Broad behavior first: an async action answering any id.
    decoy
        .when(&client)?
        .ignoring_extra_args()
        .called_with(args![])
        .then_do_async(|args| async move {
            let id = args.positional()[0].clone();
            Ok(Value::Str(format!("anonymous ({id})")))
        })?;

    // Refine with an awaited rehearsal; the newest matching stub wins.
    decoy
        .when(client.call_async(args!["user-7"]).await)?
        .then_return("Ada")?;

    println!("user-7  -> {}", fetch_name(&client, "user-7").await?);
    println!("user-42 -> {}", fetch_name(&client, "user-42").await?);

    // Verify the call the stubs did not already prove.
    decoy.verify(&client)?.called_with(args!["user-42"])?;
    decoy.reset();
    Ok(())
}
