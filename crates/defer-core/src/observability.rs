//! Observability - tracing の初期化
//!
//! `RUST_LOG` でフィルタ（未設定なら `info`）。出力は plain か JSON。
//! 何度呼んでも 2 回目以降は何もしません。

use tracing_subscriber::EnvFilter;

use crate::app::LogFormat;

pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Plain => builder.try_init(),
    };
}
