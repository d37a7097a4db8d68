/* JSON-lines sink: one object per decoded report. */
/*  */
/* Meant for debugging and for hosts without /dev/uinput. */

use std::io::Write;

use serde::Serialize;

use super::{EventSink, InputEvent, SinkError};

#[derive(Serialize)]
struct Frame<'a> {
    device: &'a str,
    events: &'a [InputEvent],
}

pub struct JsonSink<W: Write + Send> {
    device: String,
    out: W,
    pending: Vec<InputEvent>,
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout(device: &str) -> Self {
        Self::new(device, std::io::stdout())
    }
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(device: &str, out: W) -> Self {
        Self {
            device: device.to_string(),
            out,
            pending: Vec::new(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonSink<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn emit(&mut self, event: InputEvent) -> Result<(), SinkError> {
        self.pending.push(event);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        let frame = Frame {
            device: &self.device,
            events: &self.pending,
        };
        serde_json::to_writer(&mut self.out, &frame)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Axis, Key};

    #[test]
    fn one_line_per_sync() {
        let mut sink = JsonSink::new("1-2", Vec::new());
        sink.emit(InputEvent::Key {
            key: Key::A,
            pressed: true,
        })
        .unwrap();
        sink.emit(InputEvent::Abs {
            axis: Axis::X,
            value: 501,
        })
        .unwrap();
        sink.sync().unwrap();
        sink.sync().unwrap();

        let text = String::from_utf8(sink.out.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"device":"1-2","events":[{"type":"key","key":"a","pressed":true},{"type":"abs","axis":"x","value":501}]}"#
        );
        assert_eq!(lines[1], r#"{"device":"1-2","events":[]}"#);
    }
}
