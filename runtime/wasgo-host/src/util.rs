use std::env;

pub(crate) fn debug_log<F: FnOnce() -> String>(message: F) {
    if env::var("WASGO_HOST_DEBUG").is_ok() {
        eprintln!("[wasgo-host] {}", message());
    }
}
