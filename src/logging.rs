use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Installs the process logger: RFC 3339 local timestamps on stderr.
/// `RUST_LOG`, when set, overrides `level`. Calling it twice is harmless.
pub fn init(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            Local::now().to_rfc3339(),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
