use dotenvy::dotenv;
use image_ai_bot::bot::handlers::{self, Command};
use image_ai_bot::cache::ResultCache;
use image_ai_bot::config::Settings;
use image_ai_bot::session::AdmissionGate;
use image_ai_bot::vendors::VendorClients;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data from log output
struct RedactionPatterns {
    bot_token_url: Regex,
    bot_token_bare: Regex,
    vendor_key_env: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bot_token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            bot_token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            vendor_key_env: Regex::new(r"(PHOTOROOM_API_KEY|REMOVEBG_API_KEY)=[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .bot_token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]")
            .to_string();
        let output = self
            .bot_token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        self.vendor_key_env
            .replace_all(&output, "$1=[MASKED]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the Write contract even when
        // the redacted string is shorter.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Redaction must exist before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Telegram Image AI Bot...");

    let settings = init_settings();

    let gate = Arc::new(AdmissionGate::from_settings(&settings));
    info!(
        "Admission gate ready ({} requests per {}s window).",
        settings.max_requests_per_window, settings.window_seconds
    );

    let clients = Arc::new(VendorClients::from_settings(&settings));
    let cache = Arc::new(ResultCache::new());

    let bot = Bot::new(settings.telegram_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, gate, clients, cache])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    Update::filter_message()
                        .filter(|msg: Message| msg.photo().is_some())
                        .endpoint(handle_photo),
                )
                .branch(
                    Update::filter_message()
                        .filter(|msg: Message| msg.document().is_some())
                        .endpoint(handle_document),
                ),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    clients: Arc<VendorClients>,
    cache: Arc<ResultCache>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg, settings).await,
        Command::Help => handlers::help(bot, msg, clients).await,
        Command::Usage => handlers::usage(bot, msg, gate, settings, cache).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    clients: Arc<VendorClients>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_photo(bot, msg, gate, settings, clients).await {
        error!("Photo handler error: {}", e);
    }
    respond(())
}

async fn handle_document(
    bot: Bot,
    msg: Message,
    gate: Arc<AdmissionGate>,
    settings: Arc<Settings>,
    clients: Arc<VendorClients>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_document(bot, msg, gate, settings, clients).await {
        error!("Document handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    gate: Arc<AdmissionGate>,
    clients: Arc<VendorClients>,
    cache: Arc<ResultCache>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_callback(bot, q, gate, clients, cache).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
