use threadlens_types::RawFrame;

/// Frames of the signal handler and the kernel trampoline that called it.
/// Everything up to and including the last of these belongs to the capture.
const HANDLER_FRAMES: &[&str] = &["sigprof_handler", "__restore_rt", "_sigtramp"];

/// Leading frames of a direct (non-signal) capture on the calling thread.
const DIRECT_CAPTURE_FRAMES: &[&str] = &[
    "std::backtrace_rs::",
    "std::backtrace::",
    "threadlens_threads::capture_stack",
];

/// Parse the `Display` form of a `std::backtrace::Backtrace`.
///
/// In a signal capture everything through the handler and trampoline is
/// dropped; for a direct capture only the leading backtrace internals are.
/// The remaining frames are kept in order, innermost first.
pub fn parse_backtrace(text: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(last) = frames.last_mut()
                && last.location.is_none()
            {
                last.location = Some(location.trim().to_string());
            }
            continue;
        }

        let Some((index, symbol)) = trimmed.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.trim().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let symbol = symbol.trim();
        let (symbol, ip) = match parse_hex(symbol) {
            Some(ip) => (None, Some(ip)),
            None => (Some(symbol.to_string()), None),
        };
        frames.push(RawFrame {
            ip,
            symbol,
            location: None,
        });
    }

    let cut = capture_prefix_len(&frames);
    frames.drain(..cut);
    frames
}

fn symbol_matches(frame: &RawFrame, patterns: &[&str]) -> bool {
    frame
        .symbol
        .as_deref()
        .is_some_and(|symbol| patterns.iter().any(|p| symbol.contains(p)))
}

fn capture_prefix_len(frames: &[RawFrame]) -> usize {
    let Some(handler) = frames
        .iter()
        .rposition(|frame| symbol_matches(frame, HANDLER_FRAMES))
    else {
        return frames
            .iter()
            .take_while(|frame| symbol_matches(frame, DIRECT_CAPTURE_FRAMES))
            .count();
    };

    // The trampoline often shows up as one unsymbolized frame right after the handler.
    let mut cut = handler + 1;
    if frames
        .get(cut)
        .is_some_and(|frame| frame.symbol.as_deref().is_none_or(|s| s == "<unknown>"))
    {
        cut += 1;
    }
    cut
}

fn parse_hex(symbol: &str) -> Option<u64> {
    let digits = symbol.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::create
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   2: threadlens_threads::capture::imp::sigprof_handler
             at ./src/capture.rs:120:26
   3: <unknown>
   4: std::sync::mpmc::list::Channel<T>::recv
             at /rustc/abc/library/std/src/sync/mpmc/list.rs:481:17
   5: app::worker::run
             at ./src/worker.rs:12:9
   6: 0x7f00dead
";

    #[test]
    fn strips_capture_frames_and_keeps_locations() {
        let frames = parse_backtrace(SAMPLE);
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0].symbol.as_deref(),
            Some("std::sync::mpmc::list::Channel<T>::recv")
        );
        assert!(frames[0].location.as_deref().unwrap().ends_with("list.rs:481:17"));
        assert_eq!(frames[1].symbol.as_deref(), Some("app::worker::run"));
        assert_eq!(frames[1].location.as_deref(), Some("./src/worker.rs:12:9"));
    }

    #[test]
    fn blocking_frames_below_the_handler_are_kept() {
        let text = "\
   0: std::backtrace::Backtrace::create
   1: threadlens_threads::capture::imp::sigprof_handler
   2: <unknown>
   3: std::sys::pal::unix::futex::futex_wait
             at /rustc/abc/library/std/src/sys/pal/unix/futex.rs:62:21
   4: std::sys::sync::thread_parking::futex::Parker::park
   5: std::thread::park
   6: app::worker::run
";
        let symbols: Vec<_> = parse_backtrace(text)
            .into_iter()
            .map(|f| f.symbol.unwrap_or_default())
            .collect();
        assert_eq!(
            symbols,
            [
                "std::sys::pal::unix::futex::futex_wait",
                "std::sys::sync::thread_parking::futex::Parker::park",
                "std::thread::park",
                "app::worker::run",
            ]
        );
    }

    #[test]
    fn direct_capture_strips_only_backtrace_internals() {
        let text = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
   1: std::backtrace::Backtrace::force_capture
   2: threadlens_threads::capture_stack
   3: std::sys::backtrace::__rust_begin_short_backtrace
   4: app::main
";
        let frames = parse_backtrace(text);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].symbol.as_deref(),
            Some("std::sys::backtrace::__rust_begin_short_backtrace")
        );
    }

    #[test]
    fn bare_addresses_become_instruction_pointers() {
        let frames = parse_backtrace(SAMPLE);
        let last = frames.last().unwrap();
        assert_eq!(last.symbol, None);
        assert_eq!(last.ip, Some(0x7f00dead));
        assert_eq!(last.location, None);
    }

    #[test]
    fn disabled_backtrace_parses_to_nothing() {
        assert!(parse_backtrace("disabled backtrace").is_empty());
        assert!(parse_backtrace("").is_empty());
    }
}
