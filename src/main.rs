use dotenvy::dotenv;
use gatekeeper_bot::api::{Action, JoinRequestApi, TelegramGate};
use gatekeeper_bot::bot::callbacks::{self, CallbackContext};
use gatekeeper_bot::bot::handlers::{self, get_user_id_safe, Command};
use gatekeeper_bot::bot::join_requests;
use gatekeeper_bot::bot::sessions::Sessions;
use gatekeeper_bot::bot::DeniedCache;
use gatekeeper_bot::config::{
    Settings, DENIED_CACHE_MAX_SIZE, DENIED_CACHE_TTL_SECS, DENIED_COOLDOWN_SECS,
};
use gatekeeper_bot::dispatch::BulkDispatcher;
use gatekeeper_bot::executor::Executor;
use gatekeeper_bot::limit::RateLimiter;
use gatekeeper_bot::registry::PendingRegistry;
use lazy_regex::lazy_regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatJoinRequest};
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Bot token embedded in an API URL
static RE_URL_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)");
/// Bare bot token
static RE_BARE_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})");
/// Token with a "bot" prefix
static RE_PREFIXED_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+");

/// Redacts bot tokens from log output
fn redact(input: &str) -> String {
    let output = RE_URL_TOKEN.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
    let output = RE_BARE_TOKEN.replace_all(&output, "[TELEGRAM_TOKEN]");
    RE_PREFIXED_TOKEN
        .replace_all(&output, "$1[TELEGRAM_TOKEN]")
        .to_string()
}

struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&s).as_bytes())?;
        // Report the original length to satisfy the contract even when the
        // redacted string differs in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
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
        }
    }
}

/// Everything the update handlers share
struct AppContext {
    settings: Arc<Settings>,
    registry: Arc<PendingRegistry>,
    sessions: Arc<Sessions>,
    dispatcher: Arc<BulkDispatcher>,
    callbacks: Arc<CallbackContext>,
    denied: Arc<DeniedCache>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    info!("Starting Gatekeeper bot...");

    let settings = init_settings();
    let bot = Bot::new(settings.telegram_token.clone());
    let ctx = build_context(&bot, settings);

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_logging() {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
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
            if s.admin_ids().is_empty() {
                error!("ADMIN_IDS is empty: nobody will be able to manage requests.");
            }
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn build_context(bot: &Bot, settings: Arc<Settings>) -> Arc<AppContext> {
    let registry = Arc::new(PendingRegistry::new());
    let api: Arc<dyn JoinRequestApi> = Arc::new(TelegramGate::new(bot.clone(), registry.clone()));
    let executor = Arc::new(Executor::new(api.clone()));
    let limiter = Arc::new(RateLimiter::new(settings.approvals_per_second));
    let dispatcher = Arc::new(BulkDispatcher::new(
        api,
        executor.clone(),
        limiter.clone(),
        registry.clone(),
        settings.worker_pool_size,
    ));
    let sessions = Arc::new(Sessions::new());
    let callbacks = Arc::new(CallbackContext {
        registry: registry.clone(),
        executor,
        limiter,
        sessions: sessions.clone(),
        settings: settings.clone(),
    });
    let denied = Arc::new(DeniedCache::new(
        DENIED_COOLDOWN_SECS,
        DENIED_CACHE_TTL_SECS,
        DENIED_CACHE_MAX_SIZE,
    ));

    info!(
        "Dispatch core ready: {} ops/s ceiling, {} workers.",
        settings.approvals_per_second, settings.worker_pool_size
    );

    Arc::new(AppContext {
        settings,
        registry,
        sessions,
        dispatcher,
        callbacks,
        denied,
    })
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_chat_join_request().endpoint(handle_join_request))
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, ctx: Arc<AppContext>| {
                    ctx.settings.is_admin(q.from.id.0.cast_signed())
                })
                .endpoint(handle_callback_query),
        )
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
}

async fn handle_join_request(
    bot: Bot,
    req: ChatJoinRequest,
    ctx: Arc<AppContext>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) =
        join_requests::on_join_request(bot, req, ctx.registry.clone(), ctx.settings.clone()).await
    {
        error!("Join request handler error: {}", e);
    }
    respond(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<AppContext>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = callbacks::handle_callback(bot, q, ctx.callbacks.clone()).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<AppContext>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);

    if cmd.is_privileged() && !ctx.settings.is_admin(user_id) {
        handle_unauthorized(&bot, &msg, user_id, &ctx).await;
        return respond(());
    }

    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::Id => handlers::my_id(bot, msg).await,
        Command::Requests => handlers::list_requests(bot, msg, ctx.registry.clone()).await,
        Command::Select => handlers::select_chat(bot, msg, ctx.registry.clone()).await,
        Command::Approve(args) => {
            handlers::bulk(
                bot,
                msg,
                &args,
                Action::Approve,
                ctx.sessions.clone(),
                ctx.dispatcher.clone(),
            )
            .await
        }
        Command::Decline(args) => {
            handlers::bulk(
                bot,
                msg,
                &args,
                Action::Decline,
                ctx.sessions.clone(),
                ctx.dispatcher.clone(),
            )
            .await
        }
        Command::Cancel => handlers::cancel(bot, msg, ctx.sessions.clone()).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_unauthorized(bot: &Bot, msg: &Message, user_id: i64, ctx: &AppContext) {
    if ctx.denied.should_send(user_id).await {
        info!("⛔️ Unauthorized command from user {user_id}. Sending denial message.");
        match bot
            .send_message(msg.chat.id, "⛔️ You are not allowed to manage join requests.")
            .await
        {
            Ok(_) => ctx.denied.mark_sent(user_id).await,
            Err(e) => error!("Failed to send denial message to {user_id}: {e}"),
        }
    }
}
