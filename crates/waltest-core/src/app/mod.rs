//! App - アプリケーション層
//!
//! ports と pool を組み合わせてハーネスを実装する。
//!
//! # 主要コンポーネント
//! - **HarnessBuilder**: 設定からの構築とワイヤリング
//! - **Orchestrator**: TaskSpec をプールに投入し、ストア操作として実行
//! - **Scenarios**: トリガー 1 回分のタスクの組み合わせ
//! - **TransactionScope**: どの終了経路でも transaction を終わらせる
//! - **ResultDelivery**: コーディネータスレッドへの結果配送

pub mod builder;
pub mod delivery;
pub mod orchestrator;
pub mod scenarios;
pub mod transaction;

pub use self::builder::{Harness, HarnessBuilder};
pub use self::delivery::{Coordinator, ResultDelivery};
pub use self::orchestrator::Orchestrator;
pub use self::scenarios::{RACING_VALUES, Scenario, ScenarioRun};
pub use self::transaction::TransactionScope;
