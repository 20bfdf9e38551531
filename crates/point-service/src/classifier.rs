//! 价格档位划分
//!
//! | 价格区间          | 档位   |
//! |-------------------|--------|
//! | price >= 1001     | gold   |
//! | 101 <= price < 1001 | silver |
//! | price < 101       | bronze |
//!
//! 按从高到低依次判断，三个区间覆盖整个实数轴：100.5 落入 bronze，1000.5 落入 silver。
//! 负数与 0 落入 bronze，NaN 不满足任何比较，同样落入 bronze。

use crate::models::Tier;

pub const GOLD_MIN_PRICE: f64 = 1001.0;
pub const SILVER_MIN_PRICE: f64 = 101.0;

/// 根据商品价格选择要扣减的积分档位
pub fn classify(price: f64) -> Tier {
    if price >= GOLD_MIN_PRICE {
        Tier::Gold
    } else if price >= SILVER_MIN_PRICE {
        Tier::Silver
    } else {
        Tier::Bronze
    }
}
