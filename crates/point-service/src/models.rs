//! 领域模型
//!
//! 积分档位、积分计数器与商品。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 积分档位
///
/// 每个档位对应 point_counters 表中的一行，以档位名为自然键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Bronze, Tier::Silver, Tier::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(format!("未知的积分档位: {other}")),
        }
    }
}

/// 积分计数器快照
///
/// `version` 是乐观锁令牌：每次成功的条件更新都会推进它，
/// 调用方只能比较相等，不应依赖其具体取值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointCounter {
    pub id: i64,
    pub level: Tier,
    pub remaining: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl PointCounter {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// 商品
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: i64, name: impl Into<String>, price: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            price,
            created_at: now,
            updated_at: now,
        }
    }
}
