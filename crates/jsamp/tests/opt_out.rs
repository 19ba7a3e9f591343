use std::net::TcpListener;

use jsamp::configuration::{OPT_OUT_PLACEHOLDER, OPT_OUT_VARIABLE};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[cfg(target_os = "linux")]
fn thread_names() -> Vec<String> {
    std::fs::read_dir("/proc/self/task")
        .unwrap()
        .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("comm")).ok())
        .map(|name| name.trim_end().to_owned())
        .collect()
}

// One test per binary: it owns the process environment.
#[test]
fn test_environment_opt_out() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.txt");
    let port = free_port();
    let args = format!("10;{};{}", port, output.display());

    std::env::set_var(OPT_OUT_VARIABLE, "1");
    let session = jsamp::start(&args).unwrap();
    assert!(session.is_none());
    // Nothing bound, nothing spawned, nothing written
    TcpListener::bind(("127.0.0.1", port)).unwrap();
    #[cfg(target_os = "linux")]
    assert!(!thread_names().iter().any(|name| name.starts_with("JSamp")));
    assert!(!output.exists());

    #[cfg(target_os = "linux")]
    {
        std::env::set_var(OPT_OUT_VARIABLE, OPT_OUT_PLACEHOLDER);
        let session = jsamp::start(&args)
            .unwrap()
            .expect("an unexpanded placeholder must not disable profiling");
        jsamp::trigger_stop(session.local_addr()).unwrap();
        session.wait().unwrap();
        assert!(output.exists());
    }
}
