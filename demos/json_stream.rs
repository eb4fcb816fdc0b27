//! Example: JSON lines for integration
//!
//! Samples DRM clients in the background and prints one JSON object per
//! client per period, for easy integration with other tools and
//! dashboards.
//!
//! Run with: cargo run --example json_stream

#[cfg(target_os = "linux")]
fn main() -> gpu_clients::Result<()> {
    use gpu_clients::present::{StructuredFormat, StructuredWriter};
    use gpu_clients::{Config, Monitor};
    use std::io;
    use std::thread;
    use std::time::Duration;

    let config = Config::default();
    let monitor = Monitor::new(&config)?;

    let mut writer = StructuredWriter::new(io::stdout(), StructuredFormat::Json, config.view);
    let handle = monitor.start_sampling(Duration::from_millis(500), move |snapshot| {
        if let Err(e) = writer.write(&snapshot) {
            eprintln!("Error writing sample: {}", e);
        }
    })?;

    // Stream for a few seconds
    thread::sleep(Duration::from_secs(5));
    handle.stop();

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("{}", gpu_clients::platform_support_status());
}
