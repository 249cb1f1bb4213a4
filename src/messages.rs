//! Localized chat and status texts.
//!
//! Messages are addressed by key and resolved against the configured language, falling back to
//! `en_us` for keys a language does not translate. Placeholders are positional `{}` markers.

use std::collections::HashMap;
use std::sync::LazyLock;

macro_rules! hashmap {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(map.insert($key, $value);)*
        map
    }};
}

static MESSAGES: LazyLock<HashMap<&'static str, HashMap<&'static str, &'static str>>> =
    LazyLock::new(|| {
        hashmap! {
            "en_us" => hashmap! {
                "chat.game_join" => "Recording bot is on duty, commands start with {}",
                "chat.stopping" => "Stopping the recording bot",
                "chat.disconnect" => "Recording bot is leaving, see you next time",
                "chat.pause_recording" => "Nobody is moving, pausing the recording",
                "chat.continue_recording" => "Movement detected, resuming the recording",
                "chat.reached_file_size_limit" => "Recording file reached {} MB, restarting",
                "chat.reached_time_limit" => "Recording reached the {} time limit, restarting",
                "chat.creating_recording_file" => "Creating replay archive",
                "chat.created_recording_file" => "Replay archive {} created",
                "chat.option_set" => "Option {} set to {}",
                "chat.illegal_option_name" => "Unknown option {}, see {} set",
                "chat.command.help" => "Commands: {0} status | spectate | here | pos | stop | restart | set | marker | name | respawn",
                "chat.command.permission_denied" => "You are not allowed to command the recording bot",
                "chat.command.unknown" => "Unknown command, try {} for help",
                "chat.command.wrong_argument" => "Wrong command argument",
                "chat.command.status" => "Recording: {} | Not AFK: {} | Recorded/Passed: {}/{} | Packets: {} | Buffer: {} MB | File: {} MB | Name: {}",
                "chat.command.spectate" => "Spectating {} ({})",
                "chat.command.position" => "Bot is at {}",
                "chat.command.position.unknown" => "Bot position is not known yet",
                "chat.command.set.title" => "Settable options:",
                "chat.command.name" => "Recording file name set to {}",
                "chat.command.marker.no_marker" => "No marker stored",
                "chat.command.marker.list_title" => "Stored markers:",
                "chat.command.marker.add" => "Added marker at {}",
                "chat.command.marker.delete" => "Deleted marker at {}",
                "login.failed" => "Login with {} failed: {}",
                "login.microsoft.url_hint" => "Open the URL above, authorize, then paste the redirected URL here",
            },
            "zh_cn" => hashmap! {
                "chat.game_join" => "录制姬开始工作，指令以 {} 开头",
                "chat.stopping" => "正在停止录制姬",
                "chat.disconnect" => "录制姬下班了，下次再见",
                "chat.pause_recording" => "附近没有玩家活动，暂停录制",
                "chat.continue_recording" => "检测到玩家活动，继续录制",
                "chat.creating_recording_file" => "正在创建回放文件",
                "chat.created_recording_file" => "回放文件 {} 创建完毕",
                "chat.command.permission_denied" => "你没有权限操控录制姬",
            },
        }
    });

/// Resolves message keys against one configured language.
#[derive(Debug, Clone)]
pub struct Messages {
    language: String,
}

impl Messages {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }

    /// Returns the raw template for a key, falling back to `en_us` and finally the key itself.
    pub fn template(&self, key: &str) -> &'static str {
        MESSAGES
            .get(self.language.as_str())
            .and_then(|table| table.get(key))
            .or_else(|| MESSAGES.get("en_us").and_then(|table| table.get(key)))
            .copied()
            .unwrap_or("")
    }

    /// Formats a message, substituting positional `{}` placeholders in order.
    pub fn format(&self, key: &str, args: &[&str]) -> String {
        let mut rendered = self.template(key).to_string();
        // "{0}" style markers repeat the first argument
        if let Some(first) = args.first() {
            rendered = rendered.replace("{0}", first);
        }
        for arg in args {
            rendered = rendered.replacen("{}", arg, 1);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_positional_arguments() {
        let messages = Messages::new("en_us");
        assert_eq!(
            messages.format("chat.option_set", &["daytime", "6000"]),
            "Option daytime set to 6000"
        );
    }

    #[test]
    fn falls_back_to_english() {
        let messages = Messages::new("zh_cn");
        assert_eq!(
            messages.format("chat.option_set", &["weather", "false"]),
            "Option weather set to false"
        );
        assert!(messages.template("chat.game_join").contains("录制姬"));
    }

    #[test]
    fn unknown_key_is_empty() {
        let messages = Messages::new("en_us");
        assert_eq!(messages.template("chat.nonexistent"), "");
    }
}
