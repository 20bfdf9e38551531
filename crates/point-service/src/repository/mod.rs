//! 数据库仓储层
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑（扣减规则、重试在引擎中）
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 定义 trait 接口，服务层依赖抽象，测试时注入内存实现或 mock

mod counter_repo;
pub mod memory;
mod product_repo;
mod traits;

pub use counter_repo::PgCounterStore;
pub use memory::{InMemoryCounterStore, InMemoryProductRepository};
pub use product_repo::PgProductRepository;
pub use traits::*;
