//! Serve command - model check, inference server, proxy.

use harbor_backend::{BackendConfig, ModelSource};
use harbor_proxy::ProxyConfig;

use super::pull::ensure_model;

pub(crate) async fn run() -> miette::Result<()> {
    let backend = BackendConfig::from_env();
    let proxy = ProxyConfig::from_env();

    println!("Starting Harbor LLM server with frontend");
    println!("========================================");
    println!("Configuration:");
    println!("   Frontend port: {}", proxy.port);
    println!("   API port:      {} (internal)", backend.port);
    println!("   Host:          {}", proxy.host);
    println!("   Model:         {}", backend.model_path.display());
    println!("   Threads:       {}", backend.n_threads);
    println!("   Batch size:    {}", backend.n_batch);
    println!("   Context:       {} tokens", backend.n_ctx);
    println!("   GPU layers:    {}", backend.n_gpu_layers);
    println!("   Frontend:      {}", proxy.frontend_dir.display());
    println!();

    if !backend.model_path.exists() {
        println!("Model not found, downloading...");
        ensure_model(&ModelSource::default(), &backend.model_path).await?;
    }

    harbor_proxy::serve(proxy, backend)
        .await
        .map_err(|e| miette::miette!("{}", e))
}
