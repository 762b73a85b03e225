use std::sync::Arc;

use tokio::sync::mpsc;

use mirage::config::Config;
use mirage::provider::ProviderClient;
use mirage::provider::request::{FluxKontextTier, GenerationRequest, VeoTier};
use mirage::task::TaskRunner;
use mirage::task::store::InMemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let model = args.next().unwrap_or_default();
    let prompt = args.collect::<Vec<_>>().join(" ");

    if model.is_empty() || prompt.is_empty() {
        eprintln!("usage: mirage <model> <prompt...>");
        eprintln!("models: gpt4o-image, flux-kontext-pro, flux-kontext-max, veo, veo-fast, runway");
        std::process::exit(2);
    }

    let Some(request) = request_for(&model, prompt) else {
        anyhow::bail!("unknown model: {model}");
    };

    let config = Config::from_env()?;
    let provider = Arc::new(ProviderClient::new(&config));
    let store = Arc::new(InMemoryStore::new());
    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();

    let runner = TaskRunner::new(provider, store.clone()).with_reports(reports_tx);

    let task_id = runner.submit(&request).await?;
    tracing::info!(task_id = %task_id, "task submitted, waiting for terminal state");

    let Some(report) = reports_rx.recv().await else {
        anyhow::bail!("poller ended without reporting");
    };
    report.result?;

    let record = store
        .get(&task_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("task {task_id} missing from store"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}

/// CLI model names for text-only submissions. Frame-pair models (kling)
/// need image URLs and are not reachable from this driver.
fn request_for(model: &str, prompt: String) -> Option<GenerationRequest> {
    match model {
        "gpt4o-image" => Some(GenerationRequest::Gpt4oImage {
            prompt,
            size: None,
            files_url: vec![],
            n: None,
        }),
        "flux-kontext-pro" | "flux-kontext-max" => Some(GenerationRequest::FluxKontext {
            prompt,
            tier: if model.ends_with("max") {
                FluxKontextTier::Max
            } else {
                FluxKontextTier::Pro
            },
            aspect_ratio: None,
            input_image: None,
            seed: None,
        }),
        "veo" | "veo-fast" => Some(GenerationRequest::Veo {
            prompt,
            tier: if model.ends_with("fast") {
                VeoTier::Fast
            } else {
                VeoTier::Quality
            },
            image_urls: vec![],
            aspect_ratio: None,
            seed: None,
        }),
        "runway" => Some(GenerationRequest::Runway {
            prompt,
            duration: None,
            quality: None,
            aspect_ratio: None,
            image_url: None,
        }),
        _ => None,
    }
}
