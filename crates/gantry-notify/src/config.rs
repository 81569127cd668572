//! Configuration for the Notification Router's channel adapters and
//! quiet-hours window.
//!
//! Loaded from environment variables, same priority convention as the
//! rest of the ambient stack: `GANTRY_*` env vars, no config file layer
//! here (that lives in the Reload Supervisor's `ConfigStore`).

use anyhow::bail;

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    /// Recipient address used when a notification carries no explicit
    /// `target` — one per configured channel, keyed by channel name.
    pub default_recipients: Vec<(String, String)>,
    pub quiet_hours: Option<QuietHours>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
}

/// A same-day or overnight wall-clock window, `start`/`end` as minutes
/// since midnight in `timezone` (an IANA name). `start > end` means the
/// window wraps past midnight (e.g. 22:00 to 07:00).
#[derive(Debug, Clone)]
pub struct QuietHours {
    pub start_minute: u32,
    pub end_minute: u32,
    pub timezone: String,
}

impl QuietHours {
    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.start_minute == self.end_minute {
            return false;
        }
        if self.start_minute < self.end_minute {
            minute_of_day >= self.start_minute && minute_of_day < self.end_minute
        } else {
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }
}

fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

impl NotifyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let telegram = std::env::var("GANTRY_TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|bot_token| TelegramConfig { bot_token });
        let discord = std::env::var("GANTRY_DISCORD_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|bot_token| DiscordConfig { bot_token });

        if telegram.is_none() && discord.is_none() {
            bail!(
                "no notification channels configured — set GANTRY_TELEGRAM_BOT_TOKEN \
                 or GANTRY_DISCORD_BOT_TOKEN"
            );
        }

        let mut default_recipients = Vec::new();
        if let Ok(chat) = std::env::var("GANTRY_TELEGRAM_DEFAULT_CHAT") {
            default_recipients.push(("telegram".to_string(), chat));
        }
        if let Ok(chan) = std::env::var("GANTRY_DISCORD_DEFAULT_CHANNEL") {
            default_recipients.push(("discord".to_string(), chan));
        }

        let quiet_hours = match (
            std::env::var("GANTRY_QUIET_HOURS_START").ok(),
            std::env::var("GANTRY_QUIET_HOURS_END").ok(),
        ) {
            (Some(start), Some(end)) => {
                let start_minute = parse_hhmm(&start)
                    .ok_or_else(|| anyhow::anyhow!("invalid GANTRY_QUIET_HOURS_START: {start}"))?;
                let end_minute = parse_hhmm(&end)
                    .ok_or_else(|| anyhow::anyhow!("invalid GANTRY_QUIET_HOURS_END: {end}"))?;
                let timezone = std::env::var("GANTRY_QUIET_HOURS_TZ").unwrap_or_else(|_| "UTC".to_string());
                Some(QuietHours { start_minute, end_minute, timezone })
            }
            _ => None,
        };

        Ok(Self { telegram, discord, default_recipients, quiet_hours })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_day_window_contains_only_inside_hours() {
        let q = QuietHours { start_minute: 22 * 60, end_minute: 23 * 60, timezone: "UTC".into() };
        assert!(q.contains(22 * 60 + 30));
        assert!(!q.contains(21 * 60));
    }

    #[test]
    fn overnight_window_wraps_past_midnight() {
        let q = QuietHours { start_minute: 22 * 60, end_minute: 7 * 60, timezone: "UTC".into() };
        assert!(q.contains(23 * 60));
        assert!(q.contains(6 * 60));
        assert!(!q.contains(12 * 60));
    }

    #[test]
    fn zero_width_window_never_matches() {
        let q = QuietHours { start_minute: 100, end_minute: 100, timezone: "UTC".into() };
        assert!(!q.contains(100));
    }

    #[test]
    fn parse_hhmm_rejects_out_of_range() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("07:30"), Some(7 * 60 + 30));
    }
}
