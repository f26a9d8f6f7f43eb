//! Generate a batch of images and save them next to the binary.
//!
//! ```sh
//! SD_API_HOST=http://127.0.0.1:7860 cargo run --example simple_generation
//! ```

use sdwebui_rs::{InterrogateModel, SdClient, Txt2ImgPayload};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("sdwebui_rs=debug"))
        .init();

    let host = std::env::var("SD_API_HOST").unwrap_or_else(|_| "http://127.0.0.1:7860".into());
    let client = SdClient::new(host);

    if !client.health().await? {
        eprintln!("Web UI is not answering at {}", client.endpoint());
        return Ok(());
    }

    let samplers = client.samplers().await?;
    println!("{} samplers installed", samplers.len());

    let payload = Txt2ImgPayload::new("a cat wearing a tiny hat, digital art")
        .negative("lowres, blurry")
        .batch(2, 2)
        .steps(25);
    let result = client.txt2img(&payload).await?;

    for (index, (png, seed)) in result.images.iter().zip(&result.info.all_seeds).enumerate() {
        let path = format!("invision_{}_{}.png", index, seed);
        std::fs::write(&path, png)?;
        println!("Saved {}", path);
    }

    if let Some(first) = result.images.first() {
        let caption = client.interrogate(first, InterrogateModel::Clip).await?;
        println!("CLIP thinks it shows: {}", caption);
    }

    Ok(())
}
