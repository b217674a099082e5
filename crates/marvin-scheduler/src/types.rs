use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderType {
    /// Delivered when `deliver_at` arrives and the target is online.
    Time,
    /// Delivered when the target next joins the channel.
    Join,
}

impl ReminderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderType::Time => "time",
            ReminderType::Join => "join",
        }
    }
}

impl std::str::FromStr for ReminderType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(ReminderType::Time),
            "join" => Ok(ReminderType::Join),
            other => Err(format!("unknown reminder type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Delivered,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Delivered => "delivered",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "delivered" => Ok(ReminderStatus::Delivered),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            "failed" => Ok(ReminderStatus::Failed),
            other => Err(format!("unknown reminder status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Hourly,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::Hourly => "hourly",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
        }
    }

    /// The next slot is the previous `deliver_at` plus one period, never
    /// `now` plus a period, so repeated deliveries do not drift.
    pub fn advance(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Recurrence::Hourly => from + Duration::hours(1),
            Recurrence::Daily => from + Duration::days(1),
            Recurrence::Weekly => from + Duration::weeks(1),
        }
    }
}

impl std::str::FromStr for Recurrence {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Recurrence::Hourly),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            other => Err(format!("unknown recurrence '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: i64,
    pub creator_nick: String,
    pub target_nick: String,
    pub channel: String,
    pub message: String,
    pub reminder_type: ReminderType,
    pub deliver_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_attempts: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Reminder {
    /// The IRC line delivered for this reminder; the creator is named when
    /// reminding someone else.
    pub fn delivery_line(&self) -> String {
        if self.creator_nick.eq_ignore_ascii_case(&self.target_nick) {
            format!("{}: Reminder: {}", self.target_nick, self.message)
        } else {
            format!(
                "{}: Reminder from {}: {}",
                self.target_nick, self.creator_nick, self.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_advances_from_slot_not_now() {
        let slot = "2026-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            Recurrence::Daily.advance(slot),
            "2026-03-02T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            Recurrence::Hourly.advance(slot),
            "2026-03-01T11:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn delivery_line_names_foreign_creator() {
        let reminder = Reminder {
            id: 1,
            creator_nick: "bob".to_string(),
            target_nick: "alice".to_string(),
            channel: "#x".to_string(),
            message: "tea".to_string(),
            reminder_type: ReminderType::Time,
            deliver_at: None,
            recurrence: None,
            status: ReminderStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
            delivery_attempts: 0,
            expires_at: None,
        };
        assert_eq!(reminder.delivery_line(), "alice: Reminder from bob: tea");
    }
}
