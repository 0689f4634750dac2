//! Info command - show the effective configuration.

use harbor_backend::{BackendConfig, ModelSource};
use harbor_proxy::ProxyConfig;

pub(crate) fn run() -> miette::Result<()> {
    let backend = BackendConfig::from_env();
    let proxy = ProxyConfig::from_env();
    let source = ModelSource::default();

    println!("Harbor {}", env!("CARGO_PKG_VERSION"));
    println!("===========================");
    println!();

    println!("Proxy:");
    println!("  Listen:         {}", proxy.addr());
    println!("  Frontend dir:   {}", proxy.frontend_dir.display());
    println!("    Exists: {}", proxy.frontend_dir.join("index.html").exists());
    println!("  Request timeout: {:?}", proxy.request_timeout);
    println!();

    println!("Inference server:");
    println!("  URL:            {}", backend.base_url());
    println!("  Command:        {}", backend.command_line());
    println!("  Startup timeout: {:?}", backend.startup_timeout);
    println!();

    println!("Model:");
    println!("  Path:           {}", backend.model_path.display());
    println!("    Installed: {}", backend.model_path.exists());
    println!("  Source:         {}", source.url());

    Ok(())
}
