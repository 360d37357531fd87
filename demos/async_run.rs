//! Async Run Demo
//!
//! Runs a few snippets through `AsyncKernelBox`: plain output, an
//! exception, a package install and a plot.
//!
//! Run with: cargo run --example async_run
//!
//! NOTE: Requires docker and the `codebox` image.

use kernelbox::telemetry::init_tracing;
use kernelbox::{AsyncKernelBox, BoxConfig};

const PLOT: &str = "\
import matplotlib.pyplot as plt
plt.plot([1, 2, 3], [1, 4, 9])
plt.show()";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing("kernelbox-demo", None)?;

    let mut sandbox = AsyncKernelBox::docker(BoxConfig::from_env()?);
    println!("{}", sandbox.start().await?);

    for code in ["print(1 + 1)", "1 / 0", "x = 42"] {
        let outcome = sandbox.run(code).await?;
        println!("{code:>14}  →  [{}] {outcome}", outcome.kind());
    }

    println!("{}", sandbox.install("matplotlib").await?);
    let outcome = sandbox.run(PLOT).await?;
    match outcome.image_bytes() {
        Some(png) => println!("{}", sandbox.upload("plot.png", png).await?),
        None => println!("no image: {outcome}"),
    }

    println!("{}", sandbox.stop().await?);
    Ok(())
}
