//! # Transcraft CLI
//!
//! Command-line interface for the translate/critique/judge loop.
//!
//! Usage:
//!   transcraft translate --source-language <lang> --target-language <lang> [--text <text> | --file <path>]
//!   transcraft translate --payload <file.json | ->
//!   transcraft models
//!   transcraft ready
//!   transcraft prompts
//!
//! Examples:
//!   transcraft translate --source-language English --target-language French --text "Hello, world."
//!   echo "Guten Morgen" | transcraft translate --source-language German --target-language English --format text
//!   transcraft --base-url http://localhost:8000/v1 translate --payload request.json
//!
//! Emissions go to stdout as NDJSON, one per line, flushed as they arrive.
//! Logs go to stderr.

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use std::future::Future;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use transcraft_agent::{
    into_emissions, AgentKind, Emission, LoopConfig, PromptTemplates, RefinementLoop,
    TranslationPayload, TranslationRequest, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS,
};
use transcraft_error::{Error, ErrorKind, Result};
use transcraft_provider::{
    probe, wait_until_ready, LlmProvider, OpenAIProvider, ProviderConfig, ReadinessConfig,
};

#[derive(Parser)]
#[command(name = "transcraft")]
#[command(author, version, about = "Transcraft - agentic translation with self-critique")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, global = true, env = "OPENAI_API_BASE_URL")]
    base_url: Option<String>,

    /// Bearer key for the endpoint
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model to use; discovered from the endpoint when unset
    #[arg(long, global = true, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Extra request header, KEY=VALUE (repeatable)
    #[arg(long = "header", global = true, value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, default_value = "300")]
    timeout: u64,

    /// Readiness probes before giving up
    #[arg(long, global = true, default_value = "10")]
    ready_attempts: u32,

    /// Pause between readiness probes, in milliseconds
    #[arg(long, global = true, default_value = "2000")]
    ready_delay_ms: u64,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a text, streaming every agent step
    Translate(TranslateArgs),
    /// List the models served by the endpoint
    Models,
    /// Probe the endpoint once; exits 0 when it is ready
    Ready,
    /// Print the default prompt templates as JSON
    Prompts,
}

#[derive(clap::Args)]
struct TranslateArgs {
    #[arg(long, conflicts_with = "payload")]
    source_language: Option<String>,

    #[arg(long, conflicts_with = "payload")]
    target_language: Option<String>,

    /// Text to translate (reads stdin when neither --text nor --file is given)
    #[arg(long, conflicts_with_all = ["file", "payload"])]
    text: Option<String>,

    /// File holding the text to translate
    #[arg(long, conflicts_with = "payload")]
    file: Option<PathBuf>,

    /// Extra guidance for the translator
    #[arg(long, conflicts_with = "payload")]
    instruction: Option<String>,

    /// Upper bound on translate/critique/judge cycles
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    /// Advisory prompt-size budget in tokens
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    /// JSON file overriding any of the prompt templates
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// JSON request payload ("-" for stdin)
    #[arg(long)]
    payload: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Ndjson)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One JSON object per line
    Ndjson,
    /// Readable transcript
    Text,
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty header name in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// An error and the exit code it maps to
struct Failure {
    error: Error,
    code: u8,
}

impl From<Error> for Failure {
    /// Rejected requests exit with 2, everything else with 1
    fn from(error: Error) -> Self {
        let code = if error.kind().is_precondition() { 2 } else { 1 };
        Self { error, code }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

impl Cli {
    fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::from_env().with_timeout(self.timeout);
        if let Some(base_url) = &self.base_url {
            config.base_url = Some(base_url.clone());
        }
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        for (key, value) in &self.headers {
            config = config.with_header(key.clone(), value.clone());
        }
        config
    }

    fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig::default()
            .with_attempts(self.ready_attempts)
            .with_delay(Duration::from_millis(self.ready_delay_ms))
    }

    /// Provider with a model pinned, waiting for the endpoint when the model is not configured
    async fn connect(&self) -> Result<OpenAIProvider> {
        let config = self.provider_config();
        if config.default_model.is_some() {
            return build_provider(config);
        }

        let model = wait_until_ready(&build_provider(config.clone())?, &self.readiness()).await?;
        info!(model = %model, "using discovered model");
        build_provider(config.with_model(model))
    }
}

fn build_provider(config: ProviderConfig) -> Result<OpenAIProvider> {
    OpenAIProvider::new(config).map_err(|e| {
        Error::config_invalid("failed to create provider")
            .with_operation("cli::build_provider")
            .set_source(e)
    })
}

fn read_source(path: &str, stdin: &mut impl Read) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        stdin.read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .map_err(|e| Error::from(e).with_context("path", path))
}

/// Build the request and templates from flags or a payload, without touching the network
fn load_request(
    args: &TranslateArgs,
    stdin: &mut impl Read,
) -> Result<(TranslationRequest, PromptTemplates)> {
    let templates = match &args.prompts {
        Some(path) => PromptTemplates::from_file(path)?,
        None => PromptTemplates::default(),
    };
    let defaults = LoopConfig {
        max_iterations: args.max_iterations,
        max_tokens: args.max_tokens,
    };

    if let Some(source) = &args.payload {
        let json = read_source(source, stdin)?;
        let (request, overrides) = TranslationPayload::from_json(&json)?.into_request(defaults)?;
        let templates = templates.with_overrides(overrides);
        templates.validate()?;
        return Ok((request, templates));
    }

    let text = match (&args.text, &args.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_source(&path.to_string_lossy(), stdin)?,
        (None, None) => read_source("-", stdin)?,
    };

    let mut request = TranslationRequest::new(
        args.source_language.clone().unwrap_or_default(),
        args.target_language.clone().unwrap_or_default(),
        text,
    )
    .with_max_iterations(defaults.max_iterations)
    .with_max_tokens(defaults.max_tokens);
    if let Some(instruction) = &args.instruction {
        request = request.with_instruction(instruction.clone());
    }

    request.validate()?;
    Ok((request, templates))
}

fn write_emission(out: &mut impl Write, emission: &Emission, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Ndjson => writeln!(out, "{}", emission.to_ndjson()?)?,
        OutputFormat::Text => {
            writeln!(out, "[{}]", emission.agent)?;
            writeln!(out, "{}", emission.content)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Load the request, connect, and stream every emission to `out`.
///
/// `connect` only runs once the request and templates are known to be valid.
async fn translate_to<P, F, Fut>(
    args: &TranslateArgs,
    stdin: &mut impl Read,
    connect: F,
    out: &mut impl Write,
) -> std::result::Result<(), Failure>
where
    P: LlmProvider,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<P>>,
{
    let (request, templates) = load_request(args, stdin)?;
    debug!(
        source_language = %request.source_language,
        target_language = %request.target_language,
        max_iterations = request.max_iterations,
        "request loaded"
    );

    let provider = connect().await?;
    let refine = RefinementLoop::new(provider).with_templates(templates);

    let stream = into_emissions(refine.run(request));
    futures_util::pin_mut!(stream);

    let mut failed = None;
    while let Some(emission) = stream.next().await {
        write_emission(out, &emission, args.format)?;
        if emission.agent == AgentKind::Error {
            failed = Some(emission.content);
        }
    }

    match failed {
        Some(message) => Err(Failure::from(
            Error::inference_failed(message).with_operation("cli::translate"),
        )),
        None => Ok(()),
    }
}

async fn run_translate(cli: &Cli, args: &TranslateArgs) -> std::result::Result<(), Failure> {
    translate_to(
        args,
        &mut std::io::stdin().lock(),
        || cli.connect(),
        &mut std::io::stdout().lock(),
    )
    .await
}

async fn run_models(cli: &Cli) -> Result<()> {
    let provider = build_provider(cli.provider_config())?;
    let models = provider.list_models().await.map_err(|e| {
        Error::provider_unavailable("failed to list models")
            .with_operation("cli::models")
            .set_source(e)
    })?;
    for model in models {
        println!("{}", model);
    }
    Ok(())
}

async fn run_ready(cli: &Cli) -> Result<()> {
    let provider = build_provider(cli.provider_config())?;
    let models = probe(&provider, &cli.readiness()).await?;
    println!("ready: {}", models.join(", "));
    Ok(())
}

fn show_prompts() -> Result<()> {
    let json = serde_json::to_string_pretty(&PromptTemplates::default()).map_err(|e| {
        Error::new(ErrorKind::SerializationFailed, "failed to serialize templates").set_source(e)
    })?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match &cli.command {
        Commands::Translate(args) => run_translate(&cli, args).await,
        Commands::Models => run_models(&cli).await.map_err(Failure::from),
        Commands::Ready => run_ready(&cli).await.map_err(Failure::from),
        Commands::Prompts => show_prompts().map_err(Failure::from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("Error: {}", failure.error);
            ExitCode::from(failure.code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use transcraft_provider::{ProviderError, ScriptedProvider};

    fn translate_args(argv: &[&str]) -> TranslateArgs {
        let mut full = vec!["transcraft", "translate"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Translate(args) => args,
            _ => panic!("expected translate"),
        }
    }

    #[test]
    fn test_translate_defaults() {
        let args = translate_args(&["--target-language", "French", "--text", "Hello"]);
        assert_eq!(args.max_iterations, 3);
        assert_eq!(args.max_tokens, 2000);
        assert_eq!(args.format, OutputFormat::Ndjson);
    }

    #[test]
    fn test_payload_conflicts_with_flags() {
        let result = Cli::try_parse_from([
            "transcraft",
            "translate",
            "--payload",
            "req.json",
            "--text",
            "Hello",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Trace=abc=1").unwrap(),
            ("X-Trace".to_string(), "abc=1".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn test_load_request_from_flags_and_stdin() {
        let args = translate_args(&[
            "--source-language",
            "German",
            "--target-language",
            "English",
            "--instruction",
            "keep it short",
        ]);
        let (request, _) = load_request(&args, &mut Cursor::new("Guten Morgen")).unwrap();
        assert_eq!(request.source_text, "Guten Morgen");
        assert_eq!(request.instruction(), Some("keep it short"));
    }

    #[test]
    fn test_load_request_reports_missing_fields() {
        let args = translate_args(&["--source-language", "German"]);
        let err = load_request(&args, &mut Cursor::new("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.context_value("fields"), Some("target_language, source_text"));
    }

    #[test]
    fn test_load_request_from_payload_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"context": {"source_language": "English", "target_language": "Spanish",
                "source_text": "Good night", "judge_system_message": "Judge {target_language}."},
                "max_tokens": 500}"#,
        )
        .unwrap();

        let args = translate_args(&["--payload", path.to_str().unwrap(), "--max-iterations", "4"]);
        let (request, templates) = load_request(&args, &mut std::io::empty()).unwrap();
        assert_eq!(request.target_language, "Spanish");
        assert_eq!(request.max_iterations, 4);
        assert_eq!(request.max_tokens, 500);
        assert_eq!(templates.judge_system_message, "Judge {target_language}.");
    }

    #[test]
    fn test_load_request_payload_from_stdin() {
        let args = translate_args(&["--payload", "-"]);
        let err = load_request(&args, &mut Cursor::new(r#"{"max_iterations": 2}"#)).unwrap_err();
        assert_eq!(err.context_value("fields"), Some("context"));
    }

    #[test]
    fn test_load_request_missing_file() {
        let args = translate_args(&["--target-language", "French", "--file", "/nonexistent/input.txt"]);
        let err = load_request(&args, &mut std::io::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn test_rejected_request_exits_2_without_calls() {
        let provider = ScriptedProvider::new().with_responses(["Bonjour", "ok", "Yes"]);
        let args = translate_args(&["--source-language", "English", "--text", "Hello"]);
        let mut out = Vec::new();

        let failure = translate_to(&args, &mut std::io::empty(), || async { Ok(&provider) }, &mut out)
            .await
            .unwrap_err();
        assert_eq!(failure.code, 2);
        assert_eq!(failure.error.kind(), ErrorKind::MissingField);
        assert_eq!(provider.call_count(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_bad_template_exits_2_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"judgement_prompt": "Is {translaton} good?"}"#).unwrap();

        let args = translate_args(&[
            "--target-language",
            "French",
            "--text",
            "Hello",
            "--prompts",
            path.to_str().unwrap(),
        ]);
        let failure = translate_to(
            &args,
            &mut std::io::empty(),
            || async { Err::<&ScriptedProvider, _>(Error::unexpected("connect must not run")) },
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(failure.code, 2);
        assert_eq!(failure.error.kind(), ErrorKind::TemplateInvalid);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_writes_error_record_and_exits_1() {
        let provider = ScriptedProvider::new().with_responses(["Bonjour, le monde."]);
        provider.push_error(ProviderError::Network("connection reset".into()));
        let args = translate_args(&["--target-language", "French", "--text", "Hello, world."]);
        let mut out = Vec::new();

        let failure = translate_to(&args, &mut std::io::empty(), || async { Ok(&provider) }, &mut out)
            .await
            .unwrap_err();
        assert_eq!(failure.code, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"agent":"action","content":"Bonjour, le monde."}"#);
        let last = Emission::from_ndjson(lines[1]).unwrap();
        assert_eq!(last.agent, AgentKind::Error);
        assert!(last.content.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_successful_run_streams_ndjson() {
        let provider = ScriptedProvider::new().with_responses(["Bonjour", "", "Yes"]);
        let args = translate_args(&["--target-language", "French", "--text", "Hello"]);
        let mut out = Vec::new();

        translate_to(&args, &mut std::io::empty(), || async { Ok(&provider) }, &mut out)
            .await
            .unwrap_or_else(|f| panic!("unexpected failure: {}", f.error));

        let text = String::from_utf8(out).unwrap();
        let last = text.lines().last().unwrap();
        assert_eq!(last, r#"{"agent":"final translation","content":"Bonjour"}"#);
        assert_eq!(provider.call_count(), 3);
    }

    #[test]
    fn test_exit_code_follows_error_kind() {
        assert_eq!(Failure::from(Error::invalid_argument("bad")).code, 2);
        assert_eq!(Failure::from(Error::provider_unavailable("down")).code, 1);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(Failure::from(Error::from(io)).code, 1);
    }

    #[test]
    fn test_write_emission_formats() {
        let mut out = Vec::new();
        write_emission(&mut out, &Emission::judge("Yes"), OutputFormat::Ndjson).unwrap();
        write_emission(&mut out, &Emission::final_translation("Hola"), OutputFormat::Ndjson).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            r#"{"agent":"judge","content":"Yes"}"#,
            r#"{"agent":"final translation","content":"Hola"}"#,
        ]);

        let mut out = Vec::new();
        write_emission(&mut out, &Emission::critique("Fine."), OutputFormat::Text).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[critique]\nFine.\n\n");
    }
}
