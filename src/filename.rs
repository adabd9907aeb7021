//! # Filename and Text Expansion
//!
//! strftime-style expansion for recorder output paths and text overlays,
//! extended with the daemon's own conversion specifiers:
//!
//! | Spec | Meaning | Spec | Meaning |
//! |---|---|---|---|
//! | `%v` | event number | `%o` | threshold |
//! | `%q` | shot | `%Q` | labels |
//! | `%D` | diffs | `%t` | camera id |
//! | `%N` | noise | `%C` | user event text |
//! | `%i` / `%J` | motion box w/h | `%w` / `%h` | picture w/h |
//! | `%K` / `%L` | motion box x/y | `%f` | filename |
//! | `%n` | sql filetype | `%$` | camera name |
//!
//! Long-form specifiers `%{host}`, `%{fps}`, `%{dbeventid}`, `%{ver}`, and
//! the `%fps` shortcut. A numeric width prefix pads (`%05v`). Everything
//! else is handed to strftime via chrono.

use chrono::{DateTime, Local};
use log::error;
use std::fmt::Write as _;

/// Values available to the expansion, snapshot from the pipeline at the
/// time of the event.
#[derive(Debug, Clone, Default)]
pub struct ExpansionContext<'a> {
    pub camera_id: i32,
    pub camera_name: &'a str,
    pub host: &'a str,
    pub event_nr: i32,
    pub shot: i32,
    pub diffs: i32,
    pub noise: i32,
    pub threshold: i32,
    pub box_width: i32,
    pub box_height: i32,
    pub box_x: i32,
    pub box_y: i32,
    pub total_labels: i32,
    pub width: usize,
    pub height: usize,
    pub event_text: &'a str,
    pub filename: Option<&'a str>,
    pub sqltype: i32,
    pub fps: i32,
    pub dbeventid: u64,
}

/// strftime specifiers forwarded to chrono. Anything else after `%` that we
/// do not know is copied through literally.
const STRFTIME_PASSTHROUGH: &str = "aAbBcCdDeFgGHIjklmMpPrRsSTuUVwWxXyYzZ%";

fn long_specifier(word: &str, width: usize, ctx: &ExpansionContext<'_>, out: &mut String) {
    match word {
        "host" => {
            let _ = write!(out, "{:>width$}", ctx.host, width = width);
        }
        "fps" => {
            let _ = write!(out, "{:>width$}", ctx.fps, width = width);
        }
        "dbeventid" => {
            let _ = write!(out, "{:>width$}", ctx.dbeventid, width = width);
        }
        "ver" => {
            let _ = write!(out, "{:>width$}", env!("CARGO_PKG_VERSION"), width = width);
        }
        _ => {
            error!("invalid format specifier keyword '{}'", word);
            out.push('~');
        }
    }
}

/// Expand `format` for the given wall-clock time. The daemon's own
/// specifiers are substituted first, then the remainder goes through
/// strftime.
pub fn expand(format: &str, time: DateTime<Local>, ctx: &ExpansionContext<'_>) -> String {
    let mut pre = String::with_capacity(format.len() * 2);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            pre.push(c);
            continue;
        }

        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }

        let Some(spec) = chars.next() else { break };
        let pad0 = |v: i32, w: usize, def: usize| format!("{:01$}", v, if w == 0 { def } else { w });
        let pad = |v: i32, w: usize| format!("{:1$}", v, w);

        match spec {
            'v' => pre.push_str(&pad0(ctx.event_nr, width, 2)),
            'q' => pre.push_str(&pad0(ctx.shot, width, 2)),
            'D' => pre.push_str(&pad(ctx.diffs, width)),
            'N' => pre.push_str(&pad(ctx.noise, width)),
            'i' => pre.push_str(&pad(ctx.box_width, width)),
            'J' => pre.push_str(&pad(ctx.box_height, width)),
            'K' => pre.push_str(&pad(ctx.box_x, width)),
            'L' => pre.push_str(&pad(ctx.box_y, width)),
            'o' => pre.push_str(&pad(ctx.threshold, width)),
            'Q' => pre.push_str(&pad(ctx.total_labels, width)),
            't' => pre.push_str(&pad(ctx.camera_id, width)),
            'w' => pre.push_str(&pad(ctx.width as i32, width)),
            'h' => pre.push_str(&pad(ctx.height as i32, width)),
            '$' => pre.push_str(ctx.camera_name),
            'C' => {
                if !ctx.event_text.is_empty() {
                    pre.push_str(ctx.event_text);
                }
            }
            'n' => {
                if ctx.sqltype != 0 {
                    pre.push_str(&pad(ctx.sqltype, width));
                }
            }
            'f' => {
                // %fps shortcut takes priority over %f.
                if chars.peek() == Some(&'p') {
                    let mut ahead = chars.clone();
                    ahead.next();
                    if ahead.peek() == Some(&'s') {
                        chars.next();
                        chars.next();
                        pre.push_str(&pad(ctx.fps, width));
                        continue;
                    }
                }
                if let Some(name) = ctx.filename {
                    pre.push_str(name);
                }
            }
            '{' => {
                let mut word = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    word.push(c);
                }
                long_specifier(&word, width, ctx, &mut pre);
            }
            other if STRFTIME_PASSTHROUGH.contains(other) => {
                pre.push('%');
                pre.push(other);
            }
            other => {
                // Unknown code: copied with the %-sign, escaped so
                // strftime leaves it alone.
                pre.push_str("%%");
                pre.push(other);
            }
        }
    }

    time.format(&pre).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> ExpansionContext<'static> {
        ExpansionContext {
            camera_id: 3,
            camera_name: "garden",
            host: "nvr01",
            event_nr: 12,
            shot: 4,
            diffs: 1234,
            noise: 17,
            threshold: 1500,
            box_width: 120,
            box_height: 80,
            box_x: 320,
            box_y: 200,
            total_labels: 2,
            width: 640,
            height: 480,
            event_text: "20260801",
            filename: Some("/var/vigil/12-20260801.jpg"),
            sqltype: 1,
            fps: 15,
            dbeventid: 99,
        }
    }

    fn t() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 1, 13, 5, 9).unwrap()
    }

    #[test]
    fn test_event_and_shot_zero_padded() {
        assert_eq!(expand("%v-%q", t(), &ctx()), "12-04");
        assert_eq!(expand("%05v", t(), &ctx()), "00012");
    }

    #[test]
    fn test_strftime_passthrough() {
        assert_eq!(expand("%Y%m%d-%H%M%S", t(), &ctx()), "20260801-130509");
    }

    #[test]
    fn test_motion_specifiers() {
        assert_eq!(
            expand("%D/%N/%o d=%i,%J at %K,%L labels=%Q", t(), &ctx()),
            "1234/17/1500 d=120,80 at 320,200 labels=2"
        );
        assert_eq!(expand("cam %t (%$) %wx%h", t(), &ctx()), "cam 3 (garden) 640x480");
    }

    #[test]
    fn test_fps_shortcut_and_filename() {
        assert_eq!(expand("%fps", t(), &ctx()), "15");
        assert_eq!(expand("%f", t(), &ctx()), "/var/vigil/12-20260801.jpg");
    }

    #[test]
    fn test_long_specifiers() {
        assert_eq!(expand("%{host}", t(), &ctx()), "nvr01");
        assert_eq!(expand("%{dbeventid}", t(), &ctx()), "99");
        assert_eq!(expand("%{bogus}", t(), &ctx()), "~");
    }

    #[test]
    fn test_event_text_and_sqltype() {
        assert_eq!(expand("%C-%n", t(), &ctx()), "20260801-1");
        let mut quiet = ctx();
        quiet.event_text = "";
        quiet.sqltype = 0;
        assert_eq!(expand("%C-%n", t(), &quiet), "-");
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(
            expand("%v-%Y%m%d%H%M%S-%q", t(), &ctx()),
            "12-20260801130509-04"
        );
        assert_eq!(expand("%Y%m%d-timelapse", t(), &ctx()), "20260801-timelapse");
    }
}
