//! The lifecycle controller that composes connection, recorder, chat and authentication.
//!
//! All external entry points (console and in-game commands) dispatch through [`Client`]. The
//! connection and recording state machines are deliberately independent: a recording keeps
//! saving after the socket is gone, and only once the archive is done does an armed auto-restart
//! re-enter [`Client::start`].

use crate::authentication::{AuthHandle, Authenticator, MSA_AUTH_URL};
use crate::chat::{ChatDispatcher, ChatPriority};
use crate::command::{self, ChatLine, Command, CommandError};
use crate::config::{AuthType, Config, SETTABLE_OPTIONS};
use crate::connection::{self, ConnectOptions, Connection, PacketSender, PlayEvent};
use crate::messages::Messages;
use crate::recorder::{Recorder, RecordingState, format_milli};
use crate::retry::RetryCounter;
use chronicle_packets::frame;
use chronicle_packets::registry::{self, PacketTable, ProtocolVersion};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// How a stop decides about the follow-up start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartPolicy {
    Never,
    Always,
    WithinBudget,
}

/// The connection lifecycle. Only `Connected` permits sending gameplay packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    LoggingIn = 1,
    Connecting = 2,
    Connected = 3,
    Disconnecting = 4,
}

struct ClientInner {
    config: RwLock<Config>,
    config_path: String,
    auth: AuthHandle,
    chat: Arc<ChatDispatcher>,
    recorder: Arc<Recorder>,
    retry: Mutex<RetryCounter>,
    connection_state: AtomicU8,
    flag_stopping: AtomicBool,
    flag_auto_restart: AtomicBool,
    sender: tokio::sync::Mutex<Option<PacketSender>>,
    player_name: Mutex<Option<String>>,
    start_lock: tokio::sync::Mutex<()>,
}

/// The one user-visible handle on the whole bot.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: Config, config_path: &str) -> Self {
        let authenticator = match config.authenticate_type {
            AuthType::Offline => Authenticator::offline(&config.username),
            AuthType::Mojang => Authenticator::mojang(&config.username, &config.password),
            AuthType::Microsoft => Authenticator::microsoft(),
        };
        let chat = Arc::new(ChatDispatcher::new(config.chat_spam_protect));
        let recorder = Arc::new(Recorder::new(Arc::clone(&chat)));
        let retry = Mutex::new(RetryCounter::new(config.auto_relogin_attempts));

        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                config_path: config_path.to_string(),
                auth: AuthHandle::new(authenticator),
                chat,
                recorder,
                retry,
                connection_state: AtomicU8::new(ConnectionState::Disconnected as u8),
                flag_stopping: AtomicBool::new(false),
                flag_auto_restart: AtomicBool::new(false),
                sender: tokio::sync::Mutex::new(None),
                player_name: Mutex::new(None),
                start_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // ===================
    //    State getters
    // ===================

    fn set_state(&self, state: ConnectionState) {
        self.inner
            .connection_state
            .store(state as u8, Ordering::Release);
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.inner.connection_state.load(Ordering::Acquire) {
            1 => ConnectionState::LoggingIn,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_disconnected(&self) -> bool {
        self.connection_state() == ConnectionState::Disconnected
    }

    fn has_started_disconnecting(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::Disconnecting | ConnectionState::Disconnected
        )
    }

    /// Disconnected, archive finished and no restart armed.
    pub fn is_fully_stopped(&self) -> bool {
        self.is_disconnected()
            && self.inner.recorder.state() == RecordingState::Stopped
            && !self.inner.flag_auto_restart.load(Ordering::Acquire)
    }

    /// A copy-on-read snapshot of the configuration.
    pub fn config(&self) -> Config {
        self.inner.config.read().expect("config lock poisoned").clone()
    }

    fn messages(&self) -> Messages {
        Messages::new(&self.config().language)
    }

    pub fn player_name(&self) -> Option<String> {
        self.inner
            .player_name
            .lock()
            .expect("player name lock poisoned")
            .clone()
    }

    /// Queues chat text, one message per line.
    pub fn chat(&self, text: &str, priority: ChatPriority) {
        if self.is_online() {
            for line in text.lines() {
                self.inner.chat.enqueue(line, priority);
            }
        } else {
            debug!(text, "dropping chat while offline");
        }
    }

    fn tr(&self, key: &str, args: &[&str]) -> String {
        self.messages().format(key, args)
    }

    // ===================
    //     Lifecycle
    // ===================

    /// Starts the bot on user request; resets the retry budget.
    pub async fn start(&self) -> bool {
        self.inner
            .retry
            .lock()
            .expect("retry lock poisoned")
            .reset();
        self.start_internal().await
    }

    async fn start_internal(&self) -> bool {
        let _guard = self.inner.start_lock.lock().await;
        info!("starting recording bot");
        if !self.is_disconnected() {
            info!("cannot start before the previous connection is gone");
            return false;
        }
        match self.connect().await {
            Ok(()) => true,
            Err(cause) => {
                error!(cause, "failed to start");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    fn connect(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(self.connect_inner())
    }

    async fn connect_inner(&self) -> Result<(), String> {
        self.set_state(ConnectionState::LoggingIn);
        self.inner.flag_stopping.store(false, Ordering::Release);
        self.inner.flag_auto_restart.store(false, Ordering::Release);

        let config = self.config();
        let Some(version) = registry::version_by_name(&config.initial_version) else {
            return Err(format!(
                "version {} is not supported, refusing to start",
                config.initial_version
            ));
        };

        if !self.inner.auth.has_authenticated() {
            self.authenticate(&config).await?;
        }

        let (token, fallback_name) = {
            let authenticator = self.inner.auth.authenticator().lock().await;
            (
                authenticator.session_token(),
                authenticator.player_name().map(str::to_string),
            )
        };
        let login_name = token
            .as_ref()
            .map(|token| token.player_name.clone())
            .or(fallback_name)
            .unwrap_or(config.username.clone());

        self.set_state(ConnectionState::Connecting);
        let connection = connection::connect(ConnectOptions {
            address: &config.address,
            port: config.port,
            username: &login_name,
            version,
            token: token.as_ref(),
            online_mode: config.online_mode,
            connect_timeout: Duration::from_secs(config.connect_timeout_second),
        })
        .await
        .map_err(|err| err.to_string())?;

        *self
            .inner
            .player_name
            .lock()
            .expect("player name lock poisoned") = Some(connection.user_name.clone());
        *self.inner.sender.lock().await = Some(connection.sender.clone());

        // recording begins at play-state entry, before the first play packet arrives
        self.inner
            .recorder
            .start(version, &config, now_ms())
            .await
            .map_err(|err| err.to_string())?;

        let chat = Arc::clone(&self.inner.chat);
        let chat_sender = connection.sender.clone();
        tokio::spawn(async move { chat.run(chat_sender).await });

        let client = self.clone();
        tokio::spawn(async move { client.network_loop(connection).await });

        Ok(())
    }

    async fn authenticate(&self, config: &Config) -> Result<(), String> {
        let token_path = PathBuf::from("token.json");
        let mut authenticator = self.inner.auth.authenticator().lock().await;

        let mut restored = false;
        if config.store_token {
            match authenticator.load_stored(&token_path) {
                Ok(true) => {
                    info!("restored stored token");
                    restored = true;
                }
                Ok(false) => {}
                Err(err) => warn!(cause = err.to_string(), "could not read token file"),
            }
        }

        let result = if authenticator.needs_interactive_code() {
            info!("open this URL, authorize, then paste the redirected URL:");
            info!("{MSA_AUTH_URL}");
            let mut url = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            stdin
                .read_line(&mut url)
                .await
                .map_err(|err| err.to_string())?;
            authenticator.authenticate_with_redirect_url(&url).await
        } else if restored {
            // a restored session only needs revalidation; fall back to a full login
            match authenticator.refresh().await {
                Ok(()) => Ok(()),
                Err(err) if !err.is_fatal() => {
                    warn!(cause = err.to_string(), "stored token rejected, logging in again");
                    authenticator.authenticate().await
                }
                Err(err) => Err(err),
            }
        } else {
            authenticator.authenticate().await
        };

        match result {
            Ok(()) => {
                info!(
                    name = authenticator.player_name().unwrap_or("<unknown>"),
                    "logged in"
                );
                if config.store_token {
                    if let Err(err) = authenticator.store(&token_path) {
                        warn!(cause = err.to_string(), "could not persist token");
                    }
                }
                drop(authenticator);
                self.inner.auth.mark_authenticated();
                Ok(())
            }
            Err(err) => {
                if err.is_fatal() {
                    error!(cause = err.to_string(), "authentication rejected, not retrying");
                } else {
                    error!(cause = err.to_string(), "authentication failed");
                }
                Err(err.to_string())
            }
        }
    }

    /// Stops on user request. Never auto-restarts.
    pub async fn stop(&self) -> bool {
        self.stop_internal(true, RestartPolicy::Never).await
    }

    /// Saves and reconnects, used by the user command and the rollover triggers.
    pub async fn restart(&self) -> bool {
        self.stop_internal(true, RestartPolicy::Always).await
    }

    /// Stops after an unexpected disconnect; restarts only within the relogin budget.
    async fn stop_by_external_force(&self) {
        let policy = if self.config().auto_relogin {
            RestartPolicy::WithinBudget
        } else {
            RestartPolicy::Never
        };
        self.stop_internal(false, policy).await;
    }

    async fn stop_internal(&self, by_user: bool, policy: RestartPolicy) -> bool {
        if self.inner.flag_stopping.swap(true, Ordering::AcqRel) {
            warn!("already stopping");
            return false;
        }
        info!(by_user, ?policy, "stopping");
        match policy {
            RestartPolicy::Never => {
                self.inner.flag_auto_restart.store(false, Ordering::Release);
            }
            RestartPolicy::Always => {
                self.inner.flag_auto_restart.store(true, Ordering::Release);
            }
            RestartPolicy::WithinBudget => {
                let mut retry = self.inner.retry.lock().expect("retry lock poisoned");
                if retry.can_retry() {
                    retry.consume_retry_attempt();
                    self.inner.flag_auto_restart.store(true, Ordering::Release);
                } else {
                    warn!(
                        max_retries = retry.max_retries(),
                        "auto relogin budget exhausted, staying stopped"
                    );
                }
            }
        }
        self.chat(&self.tr("chat.stopping", &[]), ChatPriority::Normal);

        let client = self.clone();
        tokio::spawn(async move { client.save_and_finish().await });
        true
    }


    /// The one-shot saver: archive, disconnect, optional restart.
    async fn save_and_finish(&self) {
        if let Some(session) = self.inner.recorder.begin_saving().await {
            self.chat(&self.tr("chat.creating_recording_file", &[]), ChatPriority::Normal);
            let config = self.config();
            let finished = tokio::task::spawn_blocking(move || session.finalize(&config, now_ms()))
                .await;
            match finished {
                Ok(Ok(Some(path))) => {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    info!(path = %path.display(), "replay archive created");
                    self.chat(
                        &self.tr("chat.created_recording_file", &[&name]),
                        ChatPriority::High,
                    );
                }
                Ok(Ok(None)) => info!("recording too small, archive skipped"),
                Ok(Err(err)) => error!(cause = err.to_string(), "failed to create replay archive"),
                Err(err) => error!(cause = err.to_string(), "replay saver task failed"),
            }
        }
        self.inner.recorder.finish_saving();

        self.disconnect().await;
        self.on_fully_stopped().await;
    }

    async fn disconnect(&self) {
        let sender = self.inner.sender.lock().await.take();
        if let Some(sender) = sender {
            if self.is_online() {
                self.inner
                    .chat
                    .enqueue(&self.tr("chat.disconnect", &[]), ChatPriority::High);
            }
            // deliver the farewell before the socket goes away
            self.inner.chat.flush(&sender, ChatPriority::High).await;
            tokio::time::sleep(Duration::from_millis(200)).await;

            self.set_state(ConnectionState::Disconnecting);
            if let Err(err) = sender.shutdown().await {
                debug!(cause = err.to_string(), "socket close failed");
            }
        }
        self.inner.chat.stop();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn on_fully_stopped(&self) {
        info!("recording bot stopped");
        info!("---------------------------------------");

        if self.inner.flag_auto_restart.load(Ordering::Acquire) {
            for i in 0..3u64 {
                info!("restarting in {}s", 3 - i);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if self.inner.flag_auto_restart.load(Ordering::Acquire) {
                self.start_internal().await;
            } else {
                warn!("auto restart interrupted by user");
            }
        }
    }

    /// Disarms a pending auto-restart.
    pub fn interrupt_auto_restart(&self) {
        self.inner.flag_auto_restart.store(false, Ordering::Release);
    }

    /// Stops background workers when the whole process is being unloaded.
    pub fn discard(&self) {
        self.inner.auth.interrupt();
    }

    // =======================
    //    The network task
    // =======================

    async fn network_loop(&self, connection: Connection) {
        let Connection {
            mut reader,
            sender,
            table,
            compression,
            ..
        } = connection;

        loop {
            let frame = match frame::read_frame(&mut reader, compression).await {
                Ok(frame) => frame,
                Err(err) => {
                    if self.has_started_disconnecting() || self.inner.flag_stopping.load(Ordering::Acquire)
                    {
                        // expected close during an orderly shutdown
                        info!(cause = err.to_string(), "connection closed");
                    } else {
                        error!(cause = err.to_string(), "connection lost");
                        self.set_state(ConnectionState::Disconnected);
                        let client = self.clone();
                        tokio::spawn(async move { client.stop_by_external_force().await });
                    }
                    break;
                }
            };

            match connection::react(&frame, &table, &sender).await {
                Ok(PlayEvent::None) => {}
                Ok(PlayEvent::GameJoin) => self.on_game_joined(),
                Ok(PlayEvent::TimeUpdate) => self.inner.chat.on_time_update(),
                Ok(PlayEvent::Chat { json }) => self.on_chat_message(&json).await,
                Ok(PlayEvent::Disconnect { reason }) => {
                    info!(reason = reason.as_str(), "kicked by server");
                    self.set_state(ConnectionState::Disconnected);
                    let client = self.clone();
                    tokio::spawn(async move { client.stop_by_external_force().await });
                    // the frame still reaches the recorder below, then the loop ends on read error
                }
                Err(err) => {
                    warn!(cause = err.to_string(), "failed to handle inbound packet");
                }
            }

            let config = self.config();
            match self
                .inner
                .recorder
                .on_packet(&frame, &table, &config, now_ms())
                .await
            {
                Ok(None) => {}
                Ok(Some(rollover)) => {
                    info!(?rollover, "limit reached, rolling the recording over");
                    let client = self.clone();
                    tokio::spawn(async move { client.restart().await });
                }
                Err(err) => warn!(cause = err.to_string(), "failed to record packet"),
            }
        }

        debug!("network task ended");
    }

    fn on_game_joined(&self) {
        info!("joined the game");
        self.set_state(ConnectionState::Connected);
        self.inner
            .retry
            .lock()
            .expect("retry lock poisoned")
            .reset();

        let config = self.config();
        for command in &config.on_joined_commands {
            self.chat(command, ChatPriority::Normal);
        }
        self.chat(
            &self.tr("chat.game_join", &[&config.command_prefix]),
            ChatPriority::Normal,
        );
    }

    // =======================
    //    In-game commands
    // =======================

    async fn on_chat_message(&self, json: &str) {
        debug!(json, "chat message");
        let Some(line) = command::extract_chat_line(json) else {
            return;
        };
        if let Some(name) = &line.player_name {
            info!(from = name.as_str(), message = line.message.as_str(), "chat");
        } else {
            info!(message = line.message.as_str(), "server chat");
        }

        // never react to our own announcements
        if line.player_name.is_some() && line.player_name == self.player_name() {
            return;
        }

        let config = self.config();
        let Some(parsed) = command::parse(&config.command_prefix, &line.message) else {
            return;
        };

        if config.enabled {
            if let Some(name) = &line.player_name {
                if !config.whitelist.contains(name) {
                    self.chat(
                        &self.tr("chat.command.permission_denied", &[]),
                        ChatPriority::Normal,
                    );
                    return;
                }
            }
        }

        match parsed {
            Ok(command) => self.execute(command, &line).await,
            Err(err) => self.report_command_error(err, &config),
        }
    }

    fn report_command_error(&self, err: CommandError, config: &Config) {
        let text = match err {
            CommandError::Unknown => self.tr("chat.command.unknown", &[&config.command_prefix]),
            CommandError::WrongArguments => self.tr("chat.command.wrong_argument", &[]),
            CommandError::PermissionDenied => self.tr("chat.command.permission_denied", &[]),
            CommandError::IllegalOption(option) => {
                self.tr("chat.illegal_option_name", &[&option, &config.command_prefix])
            }
        };
        self.chat(&text, ChatPriority::Normal);
    }

    async fn execute(&self, command: Command, line: &ChatLine) {
        let config = self.config();
        info!(?command, from = ?line.player_name, "executing command");

        match command {
            Command::Help => {
                self.chat(
                    &self.tr("chat.command.help", &[&config.command_prefix]),
                    ChatPriority::Normal,
                );
            }
            Command::Status => {
                let status = self.inner.recorder.status(&config, now_ms()).await;
                self.chat(&status, ChatPriority::Normal);
            }
            Command::Spectate => {
                let (Some(name), Some(uuid)) = (&line.player_name, line.player_uuid) else {
                    self.report_command_error(CommandError::WrongArguments, &config);
                    return;
                };
                self.chat(
                    &self.tr("chat.command.spectate", &[name, &uuid.to_string()]),
                    ChatPriority::Normal,
                );
                self.send_or_log(|sender| async move { sender.send_spectate(uuid).await })
                    .await;
            }
            Command::Here => {
                self.chat("!!here", ChatPriority::Normal);
            }
            Command::Position => match self.inner.recorder.position().await {
                Some(position) => {
                    let rendered = format!(
                        "({:.2}, {:.2}, {:.2})",
                        position.x, position.y, position.z
                    );
                    self.chat(
                        &self.tr("chat.command.position", &[&rendered]),
                        ChatPriority::Normal,
                    );
                }
                None => {
                    self.chat(
                        &self.tr("chat.command.position.unknown", &[]),
                        ChatPriority::Normal,
                    );
                }
            },
            Command::Stop => {
                self.stop().await;
            }
            Command::Restart => {
                self.restart().await;
            }
            Command::SetList => {
                self.chat(&self.tr("chat.command.set.title", &[]), ChatPriority::Normal);
                self.chat(&SETTABLE_OPTIONS.join(", "), ChatPriority::Normal);
            }
            Command::Set { option, value } => self.set_config_entry(&option, &value),
            Command::MarkerList => {
                let markers = self.inner.recorder.list_markers().await;
                if markers.is_empty() {
                    self.chat(
                        &self.tr("chat.command.marker.no_marker", &[]),
                        ChatPriority::Normal,
                    );
                } else {
                    self.chat(
                        &self.tr("chat.command.marker.list_title", &[]),
                        ChatPriority::Normal,
                    );
                    for (index, (time, name)) in markers.iter().enumerate() {
                        self.chat(
                            &format!(
                                "{}. {} {}",
                                index + 1,
                                format_milli(*time),
                                name.as_deref().unwrap_or("")
                            ),
                            ChatPriority::Normal,
                        );
                    }
                }
            }
            Command::MarkerAdd { name } => {
                match self
                    .inner
                    .recorder
                    .add_marker(name.as_deref(), now_ms())
                    .await
                {
                    Ok(Some(time)) => {
                        self.chat(
                            &self.tr("chat.command.marker.add", &[&format_milli(time)]),
                            ChatPriority::Normal,
                        );
                    }
                    Ok(None) => warn!("cannot add a marker, position unknown"),
                    Err(err) => warn!(cause = err.to_string(), "marker add failed"),
                }
            }
            Command::MarkerDelete { index } => {
                match self.inner.recorder.delete_marker(index).await {
                    Ok(Some(time)) => {
                        self.chat(
                            &self.tr("chat.command.marker.delete", &[&format_milli(time)]),
                            ChatPriority::Normal,
                        );
                    }
                    Ok(None) => self.report_command_error(CommandError::WrongArguments, &config),
                    Err(err) => warn!(cause = err.to_string(), "marker delete failed"),
                }
            }
            Command::Name { file_name } => {
                self.inner.recorder.set_file_name(&file_name).await;
                self.chat(
                    &self.tr("chat.command.name", &[&file_name]),
                    ChatPriority::Normal,
                );
            }
            Command::Respawn => {
                info!("respawning");
                self.send_or_log(|sender| async move { sender.send_respawn().await })
                    .await;
            }
        }
    }

    /// Applies a runtime option change and acknowledges it in chat.
    pub fn set_config_entry(&self, option: &str, value: &str) {
        let result = {
            let mut config = self.inner.config.write().expect("config lock poisoned");
            config.set_option(option, value)
        };
        let config = self.config();
        match result {
            Ok(()) => {
                info!(option, value, "option changed");
                self.inner
                    .chat
                    .set_spam_protect(config.chat_spam_protect);
                self.inner
                    .retry
                    .lock()
                    .expect("retry lock poisoned")
                    .set_max_retries(config.auto_relogin_attempts);
                self.chat(
                    &self.tr("chat.option_set", &[option, value]),
                    ChatPriority::Normal,
                );
            }
            Err(err) => self.report_command_error(err, &config),
        }
    }

    async fn send_or_log<F, Fut>(&self, send: F)
    where
        F: FnOnce(PacketSender) -> Fut,
        Fut: Future<Output = Result<(), connection::ConnectionError>>,
    {
        let sender = self.inner.sender.lock().await.clone();
        match sender {
            Some(sender) => {
                if let Err(err) = send(sender).await {
                    warn!(cause = err.to_string(), "failed to send packet");
                }
            }
            None => warn!("cannot send a packet while offline"),
        }
    }

    /// Handles one console line; returns false once the process should exit.
    pub async fn on_console_command(&self, line: &str) -> bool {
        let line = line.trim();
        let args: Vec<&str> = line.split(' ').collect();
        match args.as_slice() {
            [""] => {}
            ["start"] => {
                self.start().await;
            }
            ["stop"] => {
                self.stop().await;
            }
            ["restart"] => {
                self.restart().await;
            }
            ["status"] => {
                let status = self.inner.recorder.status(&self.config(), now_ms()).await;
                info!(status = status.as_str(), state = ?self.connection_state());
            }
            ["say", rest @ ..] if !rest.is_empty() => {
                self.chat(&rest.join(" "), ChatPriority::Normal);
            }
            ["set", option, value] => {
                self.set_config_entry(option, value);
            }
            ["exit"] => {
                if !self.is_fully_stopped() {
                    self.interrupt_auto_restart();
                    self.stop().await;
                    while !self.is_fully_stopped() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
                self.discard();
                return false;
            }
            _ => info!("console commands: start, stop, restart, status, say <text>, set <option> <value>, exit"),
        }
        true
    }

    /// Persists the current configuration back to its file.
    pub fn save_config(&self) {
        let config = self.config();
        match serde_json::to_string_pretty(&config) {
            Ok(rendered) => {
                if let Err(err) = std::fs::write(&self.inner.config_path, rendered) {
                    warn!(cause = err.to_string(), "could not save config");
                }
            }
            Err(err) => warn!(cause = err.to_string(), "could not render config"),
        }
    }

}

/// Convenience accessors used by the integration tests.
impl Client {
    pub fn resolved_version(&self) -> Option<&'static ProtocolVersion> {
        registry::version_by_name(&self.config().initial_version)
    }

    pub fn packet_table(&self) -> Option<PacketTable> {
        self.resolved_version()
            .and_then(|version| PacketTable::new(version.protocol).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_roundtrip() {
        let client = Client::new(Config::default(), "config.json");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        client.set_state(ConnectionState::Connected);
        assert!(client.is_online());
        client.set_state(ConnectionState::Disconnecting);
        assert!(client.has_started_disconnecting());
    }

    #[test]
    fn version_resolution_follows_config() {
        let mut config = Config::default();
        config.initial_version = "1.12.2".to_string();
        let client = Client::new(config, "config.json");
        assert_eq!(client.resolved_version().expect("version missing").protocol, 340);

        let mut config = Config::default();
        config.initial_version = "2.0".to_string();
        let client = Client::new(config, "config.json");
        assert!(client.resolved_version().is_none());
    }

    #[tokio::test]
    async fn set_config_entry_rejects_non_settable_options() {
        let client = Client::new(Config::default(), "config.json");
        client.set_config_entry("password", "oops");
        assert_eq!(client.config().password, "");

        client.set_config_entry("daytime", "6000");
        assert_eq!(client.config().daytime, 6000);
    }
}
