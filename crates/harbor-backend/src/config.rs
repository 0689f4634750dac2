//! Inference server configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default loopback port for the inference server.
pub const DEFAULT_BACKEND_PORT: u16 = 8001;

/// Default location of the GGUF model file.
pub const DEFAULT_MODEL_PATH: &str = "/app/models/phi-3-mini-128k-q4.gguf";

/// Default bearer token the inference server is started with.
pub const DEFAULT_API_KEY: &str = "Hello1";

/// Configuration for launching and addressing the inference server.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Program to execute (default: python3)
    pub program: String,
    /// Arguments placed before the generated flags (default: -m llama_cpp.server)
    pub program_args: Vec<String>,
    /// Interface the server binds to. Loopback only.
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub api_key: String,
    pub n_threads: u32,
    pub n_batch: u32,
    /// Context window in tokens (128k)
    pub n_ctx: u32,
    /// 0 keeps inference on the CPU
    pub n_gpu_layers: u32,
    pub chat_format: String,
    /// How long to wait for the server to answer health checks after spawn
    pub startup_timeout: Duration,
    /// Grace period between SIGTERM and a forced kill
    pub stop_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            program_args: vec!["-m".to_string(), "llama_cpp.server".to_string()],
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BACKEND_PORT,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            api_key: DEFAULT_API_KEY.to_string(),
            n_threads: 8,
            n_batch: 512,
            n_ctx: 131_072,
            n_gpu_layers: 0,
            chat_format: "chatml".to_string(),
            startup_timeout: Duration::from_secs(180),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl BackendConfig {
    /// Create config from `HARBOR_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(program) = lookup("HARBOR_BACKEND_PROGRAM") {
            config.program = program;
        }
        if let Some(args) = lookup("HARBOR_BACKEND_ARGS") {
            config.program_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(path) = lookup("HARBOR_MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(key) = lookup("HARBOR_API_KEY") {
            config.api_key = key;
        }
        if let Some(format) = lookup("HARBOR_CHAT_FORMAT") {
            config.chat_format = format;
        }

        config.port = parse_or(&lookup, "HARBOR_BACKEND_PORT", config.port);
        config.n_threads = parse_or(&lookup, "HARBOR_N_THREADS", config.n_threads);
        config.n_batch = parse_or(&lookup, "HARBOR_N_BATCH", config.n_batch);
        config.n_ctx = parse_or(&lookup, "HARBOR_N_CTX", config.n_ctx);
        config.n_gpu_layers = parse_or(&lookup, "HARBOR_N_GPU_LAYERS", config.n_gpu_layers);

        let startup_secs = parse_or(
            &lookup,
            "HARBOR_STARTUP_TIMEOUT_SECS",
            config.startup_timeout.as_secs(),
        );
        config.startup_timeout = Duration::from_secs(startup_secs);

        config
    }

    /// Create a builder for configuration.
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    /// Base URL of the inference server, e.g. `http://127.0.0.1:8001`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full argument vector passed to [`BackendConfig::program`].
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend([
            "--model".to_string(),
            self.model_path.display().to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--n_threads".to_string(),
            self.n_threads.to_string(),
            "--n_batch".to_string(),
            self.n_batch.to_string(),
            "--n_ctx".to_string(),
            self.n_ctx.to_string(),
            "--n_gpu_layers".to_string(),
            self.n_gpu_layers.to_string(),
            "--chat_format".to_string(),
            self.chat_format.clone(),
            "--api_key".to_string(),
            self.api_key.clone(),
        ]);
        args
    }

    /// Render the command line for logs and the `info` command.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.command_args());
        parts.join(" ")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value {:?} for {}", raw, key);
                default
            }
        },
        None => default,
    }
}

/// Builder for backend configuration.
#[derive(Debug, Default)]
pub struct BackendConfigBuilder {
    config: BackendConfig,
}

impl BackendConfigBuilder {
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.config.program = program.into();
        self
    }

    pub fn program_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.model_path = path.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn n_threads(mut self, threads: u32) -> Self {
        self.config.n_threads = threads;
        self
    }

    pub fn n_ctx(mut self, ctx: u32) -> Self {
        self.config.n_ctx = ctx;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn build(self) -> BackendConfig {
        self.config
    }
}
