use std::{fs::OpenOptions, io::Write, path::PathBuf};

use crate::trace::now_ms;

// Panics inside the classifier task would otherwise only reach a stderr that
// may already be gone. Keep a copy in the data dir and never panic in the hook.
pub fn install_best_effort(data_dir: PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let bt = std::backtrace::Backtrace::force_capture();
        let msg = format!(
            "ts_ms={}\npanic={info}\nbacktrace={bt}\n---\n",
            now_ms()
        );

        let _ = std::fs::create_dir_all(&data_dir);
        if let Ok(mut f) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join("panic.log"))
        {
            let _ = f.write_all(msg.as_bytes());
        }

        default_hook(info);
    }));
}
