//! Log sanitation for outgoing payload previews. Reading messages embed
//! newlines (the display templates are three-line), so anything quoted into a
//! log line is escaped and capped here to keep the log grep-able.

/// Escape and cap a payload for single-line logging.
/// Control characters become visible escapes, anything past `max` chars is
/// replaced with an ellipsis.
pub fn preview(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape with the default preview length used by the send/ack logs.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 120;
    preview(s, MAX_PREVIEW)
}

#[cfg(test)]
mod tests {
    use super::{escape_log, preview};

    #[test]
    fn escapes_template_newlines() {
        let s = "07/21 14:02\nT: 81F -8.0 snr/2 hop\nH: 29%";
        let esc = escape_log(s);
        assert!(!esc.contains('\n'));
        assert!(esc.contains("\\nT: 81F"));
    }

    #[test]
    fn caps_long_payloads() {
        let s = "x".repeat(400);
        let out = preview(&s, 10);
        assert_eq!(out, format!("{}…", "x".repeat(10)));
    }
}
