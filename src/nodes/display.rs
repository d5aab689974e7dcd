//! Display stage and the text sink boundary
//!
//! The host application supplies the [`TextSink`]; the stage only renders
//! each payload to text and appends it.

use crate::runtime::node::{ProcessNode, StageContext, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use std::io::{self, Write};
use std::marker::PhantomData;
use tracing::debug;

/// A text area the pipeline can append to
pub trait TextSink: Send {
    fn append(&mut self, text: &str) -> io::Result<()>;

    /// True if the sink has a cursor that can follow new content
    fn supports_cursor(&self) -> bool {
        false
    }

    fn move_cursor_to_end(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Payloads that can be shown as text
pub trait Render {
    fn render(&self) -> String;
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl Render for Vec<u8> {
    fn render(&self) -> String {
        String::from_utf8_lossy(self).into_owned()
    }
}

impl Render for Vec<String> {
    fn render(&self) -> String {
        self.join(", ")
    }
}

/// Writes one item per line to any `Write` (stdout in the CLI)
pub struct ConsoleSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TextSink for ConsoleSink<W> {
    fn append(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", text)?;
        self.writer.flush()
    }
}

/// Sink stage appending every item to a [`TextSink`]
///
/// Input: `in` - any [`Render`] payload
pub struct TextDisplay<T, S> {
    name: String,
    sink: S,
    auto_scroll: bool,
    items_shown: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S: TextSink> TextDisplay<T, S> {
    pub fn new(sink: S) -> Self {
        Self {
            name: "text_display".to_string(),
            sink,
            auto_scroll: true,
            items_shown: 0,
            _payload: PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_auto_scroll(mut self, auto_scroll: bool) -> Self {
        self.auto_scroll = auto_scroll;
        self
    }
}

impl<T, S> ProcessNode for TextDisplay<T, S>
where
    T: Render + Send + Clone + 'static,
    S: TextSink,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<T>("in", 0, PortDirection::Input)]
    }

    fn work(&mut self, ctx: &StageContext<'_>) -> WorkResult<usize> {
        let item = ctx.input::<T>(0)?.recv()?;
        self.sink.append(&item.render())?;
        if self.auto_scroll && self.sink.supports_cursor() {
            self.sink.move_cursor_to_end()?;
        }
        self.items_shown += 1;
        Ok(1)
    }

    fn on_shutdown(&mut self, _ctx: &StageContext<'_>) -> WorkResult<()> {
        debug!("[{}] Displayed {} items", self.name, self.items_shown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::{InputPort, OutputPort, StageStop, WorkError};
    use crate::runtime::sender::ChannelMessage;
    use crossbeam_channel::unbounded;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        text: Arc<Mutex<Vec<String>>>,
        cursor_moves: Arc<Mutex<usize>>,
        cursor: bool,
    }

    impl TextSink for RecordingSink {
        fn append(&mut self, text: &str) -> io::Result<()> {
            self.text.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn supports_cursor(&self) -> bool {
            self.cursor
        }

        fn move_cursor_to_end(&mut self) -> io::Result<()> {
            *self.cursor_moves.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn show<T: Render + Send + Clone + 'static>(
        display: &mut TextDisplay<T, RecordingSink>,
        items: Vec<T>,
    ) {
        let (tx, rx) = unbounded();
        for item in items {
            tx.send(ChannelMessage::Sample(item)).unwrap();
        }
        tx.send(ChannelMessage::EndOfStream).unwrap();
        let inputs = [InputPort::new(rx)];
        let outputs: [OutputPort; 0] = [];
        let stop = StageStop::standalone();
        let ctx = StageContext::new(&inputs, &outputs, &stop);
        loop {
            match display.work(&ctx) {
                Ok(_) => {}
                Err(WorkError::Shutdown) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_renders_payload_kinds() {
        assert_eq!("a,b".to_string().render(), "a,b");
        assert_eq!(b"ok\xff".to_vec().render(), "ok\u{fffd}");
        assert_eq!(vec!["1".to_string(), "2".to_string()].render(), "1, 2");
    }

    #[test]
    fn test_appends_and_scrolls_when_supported() {
        let sink = RecordingSink {
            cursor: true,
            ..RecordingSink::default()
        };
        let mut display = TextDisplay::<String, _>::new(sink.clone());
        show(&mut display, vec!["one".to_string(), "two".to_string()]);

        assert_eq!(*sink.text.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(*sink.cursor_moves.lock().unwrap(), 2);
    }

    #[test]
    fn test_no_scroll_without_cursor_or_when_disabled() {
        let plain = RecordingSink::default();
        let mut display = TextDisplay::<Vec<String>, _>::new(plain.clone());
        show(&mut display, vec![vec!["1".to_string()]]);
        assert_eq!(*plain.cursor_moves.lock().unwrap(), 0);

        let cursor = RecordingSink {
            cursor: true,
            ..RecordingSink::default()
        };
        let mut display = TextDisplay::<String, _>::new(cursor.clone()).with_auto_scroll(false);
        show(&mut display, vec!["x".to_string()]);
        assert_eq!(*cursor.cursor_moves.lock().unwrap(), 0);
    }

    #[test]
    fn test_console_sink_writes_lines() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.append("1, 2, 3").unwrap();
        sink.append("4, 5, 6").unwrap();
        assert_eq!(sink.into_inner(), b"1, 2, 3\n4, 5, 6\n");
    }
}
