use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub profile_completed: bool,
    pub kyc_status: String,
    pub is_active: bool,
    pub government_id_type: Option<String>,
    pub government_id_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: f64,
    pub demo_balance: f64,
    pub total_deposited: f64,
    pub total_withdrawn: f64,
    pub total_profit_loss: f64,
    pub today_profit_loss: f64,
    pub signal_strength: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub method: String,
    pub currency: String,
    pub wallet_address: Option<String>,
    pub tx_hash: Option<String>,
    pub screenshot_url: Option<String>,
    pub status: String,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub method: String,
    pub currency: String,
    pub wallet_address: Option<String>,
    pub bank_details: Option<serde_json::Value>,
    pub status: String,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub leverage: i32,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub profit_loss: f64,
    pub admin_profit_override: Option<f64>,
    pub is_demo: bool,
    pub status: String,
    pub order_type: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub sender: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceAdjustment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub previous_balance: f64,
    pub adjustment_type: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Profile joined with its balance row, as listed in the admin console.
#[derive(Debug, Clone, Serialize)]
pub struct UserWithBalance {
    #[serde(flatten)]
    pub profile: Profile,
    pub balance_data: Option<Balance>,
}

// ─── String-backed enums ─────────────────────────────────────────────────
// Columns stay TEXT; these give the handlers something typed to match on.

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {other}", stringify!($name))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(RequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(TradeSide {
    Buy => "buy",
    Sell => "sell",
});

text_enum!(TradeStatus {
    Open => "open",
    Closed => "closed",
});

text_enum!(OrderType {
    Market => "market",
    Limit => "limit",
});

text_enum!(Sender {
    User => "user",
    Admin => "admin",
});

text_enum!(KycStatus {
    NotStarted => "not_started",
    Submitted => "submitted",
    PendingReview => "pending_review",
    Verified => "verified",
    Rejected => "rejected",
});

impl Trade {
    pub fn side(&self) -> Result<TradeSide, String> {
        self.side.parse()
    }

    pub fn status(&self) -> Result<TradeStatus, String> {
        self.status.parse()
    }
}
