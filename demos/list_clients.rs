//! Example: One-shot list of GPU clients
//!
//! Takes two scans one period apart and prints how busy each client kept
//! every engine in between.
//!
//! Run with: cargo run --example list_clients
//!
//! Note: only clients of processes you may inspect are listed; run as root
//! to see all of them.

#[cfg(target_os = "linux")]
fn main() -> gpu_clients::Result<()> {
    use gpu_clients::{Config, EngineView, Monitor};
    use std::thread;

    let config = Config::default();

    let mut monitor = match Monitor::new(&config) {
        Ok(monitor) => monitor,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_permission_error() {
                eprintln!();
                eprintln!("To see other users' processes, run as root:");
                eprintln!("  sudo cargo run --example list_clients");
            }
            return Err(e);
        }
    };

    // Initial scan to establish baselines
    monitor.sample();
    thread::sleep(config.period());
    let snapshot = monitor.sample();

    if snapshot.is_empty() {
        println!("No DRM clients found");
        return Ok(());
    }

    let mut minor = None;
    for client in &snapshot.clients {
        if minor != Some(client.drm_minor()) {
            minor = Some(client.drm_minor());
            println!();
            println!(
                "DRM minor {} ({} {})",
                client.drm_minor(),
                client.driver(),
                client.pdev()
            );
        }

        print!("  {:>7} {:<16}", client.pid(), client.print_name());
        let engines = client.engines();
        for (i, name) in engines.names().iter().enumerate() {
            if let Some(pct) = client.busy_percent(i, snapshot.elapsed, EngineView::Aggregated) {
                print!(" {}: {:5.1}%", name, pct);
            }
        }
        println!();
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("{}", gpu_clients::platform_support_status());
}
