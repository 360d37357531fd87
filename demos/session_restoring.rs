//! Session Restoring Demo
//!
//! Starts a sandbox, defines a variable, drops the handle, then reattaches
//! to the same container by session id and reads the variable back.
//!
//! Run with: cargo run --example session_restoring
//!
//! NOTE: Requires docker and the `codebox` image:
//!   docker build -t codebox .

use std::sync::Arc;

use kernelbox::container::DockerCli;
use kernelbox::{BoxConfig, KernelBox, SessionIdentity};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("┌─────────────────────────────────────────┐");
    println!("│  Session Restoring Demo                 │");
    println!("└─────────────────────────────────────────┘\n");

    let config = BoxConfig::from_env()?;
    let runtime = Arc::new(DockerCli::default());

    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Start a sandbox and leave some state in the kernel
    // ─────────────────────────────────────────────────────────────────────
    let mut sandbox = KernelBox::new(config.clone(), runtime.clone());
    println!("1. {}", sandbox.start()?);
    sandbox.run("hello = 'Hello World!'")?;

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Keep only the identity, as another process would
    // ─────────────────────────────────────────────────────────────────────
    let saved = serde_json::to_string(&sandbox.identity())?;
    drop(sandbox);
    println!("2. Saved identity: {saved}\n");

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Reattach and read the state back
    // ─────────────────────────────────────────────────────────────────────
    let identity: SessionIdentity = serde_json::from_str(&saved)?;
    let mut restored = KernelBox::from_id(config, runtime, identity)?;
    let outcome = restored.run("print(hello)");
    println!("3. Restored session printed: {}", outcome.as_ref().map(|o| o.to_string()).unwrap_or_default());

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Clean up
    // ─────────────────────────────────────────────────────────────────────
    println!("4. {}", restored.stop()?);
    outcome?;
    Ok(())
}
