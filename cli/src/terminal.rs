use async_trait::async_trait;
use cirrus_core::stream::encode;
use cirrus_core::{EventSink, StreamEvent, TransportClosed};
use console::style;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Prints stream events as they arrive. Tokens are written inline; status
/// and tool progress go on their own dimmed lines.
#[derive(Debug, Default)]
pub struct Renderer {
    mid_line: bool,
    raw: bool,
}

impl Renderer {
    pub fn new(raw: bool) -> Self {
        Self {
            mid_line: false,
            raw,
        }
    }

    pub fn render(&mut self, event: &StreamEvent) {
        let mut stdout = std::io::stdout().lock();

        if self.raw {
            let _ = write!(stdout, "{}", encode(event));
            let _ = stdout.flush();
            return;
        }

        match event {
            StreamEvent::Token(fragment) => {
                let _ = write!(stdout, "{}", fragment);
                self.mid_line = !fragment.ends_with('\n');
            }
            StreamEvent::Status(text) => {
                self.break_line(&mut stdout);
                let _ = writeln!(stdout, "{}", style(format!("· {}", text)).dim());
            }
            StreamEvent::ToolInvoked { label } => {
                self.break_line(&mut stdout);
                let _ = writeln!(stdout, "{}", style(format!("⚙ {}...", label)).yellow());
            }
            StreamEvent::Done => {
                self.break_line(&mut stdout);
                let _ = writeln!(stdout);
            }
            StreamEvent::Error(message) => {
                self.break_line(&mut stdout);
                eprintln!("{} {}", style("❌").red(), style(message).red());
            }
        }
        let _ = stdout.flush();
    }

    fn break_line(&mut self, out: &mut impl Write) {
        if self.mid_line {
            let _ = writeln!(out);
            self.mid_line = false;
        }
    }
}

/// Process-wide Ctrl-C handling. A single listener owns SIGINT: while a turn
/// is running the signal cancels it, otherwise the process exits.
#[derive(Clone)]
pub struct Interrupts {
    busy: Arc<AtomicBool>,
    count: Arc<watch::Sender<u64>>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            count: Arc::new(watch::Sender::new(0)),
        }
    }
}

impl Interrupts {
    pub fn install() -> Self {
        let interrupts = Self::default();
        let listener = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !listener.interrupt() {
                    println!("\n👋 Goodbye!");
                    std::process::exit(130);
                }
            }
        });
        interrupts
    }

    /// Cancels the running turn. Returns false when no turn is running.
    fn interrupt(&self) -> bool {
        if !self.busy.load(Ordering::SeqCst) {
            return false;
        }
        self.count.send_modify(|n| *n += 1);
        true
    }

    pub fn sink(&self, raw: bool) -> TerminalSink {
        self.busy.store(true, Ordering::SeqCst);
        TerminalSink {
            renderer: Mutex::new(Renderer::new(raw)),
            interrupts: self.clone(),
            started: *self.count.borrow(),
        }
    }
}

/// Event sink for in-process turns. Closed once Ctrl-C arrives after it was
/// created.
pub struct TerminalSink {
    renderer: Mutex<Renderer>,
    interrupts: Interrupts,
    started: u64,
}

impl TerminalSink {
    fn is_closed(&self) -> bool {
        *self.interrupts.count.borrow() != self.started
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        self.interrupts.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSink for TerminalSink {
    async fn send(&self, event: StreamEvent) -> Result<(), TransportClosed> {
        if self.is_closed() {
            return Err(TransportClosed);
        }
        match self.renderer.lock() {
            Ok(mut renderer) => renderer.render(&event),
            Err(_) => return Err(TransportClosed),
        }
        Ok(())
    }

    async fn closed(&self) {
        let started = self.started;
        let mut rx = self.interrupts.count.subscribe();
        let _ = rx.wait_for(|n| *n != started).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn open_sink_accepts_events() {
        let sink = Interrupts::default().sink(false);
        assert!(sink.send(StreamEvent::Status("generating".into())).await.is_ok());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sink.closed())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn interrupt_closes_the_running_turn() {
        let interrupts = Interrupts::default();
        let sink = interrupts.sink(false);

        assert!(interrupts.interrupt());
        assert_eq!(sink.send(StreamEvent::Done).await, Err(TransportClosed));
        sink.closed().await;
    }

    #[test]
    fn interrupt_at_the_prompt_is_not_consumed() {
        let interrupts = Interrupts::default();
        assert!(!interrupts.interrupt());

        drop(interrupts.sink(false));
        assert!(!interrupts.interrupt());
    }

    #[tokio::test]
    async fn next_turn_starts_open_after_an_interrupt() {
        let interrupts = Interrupts::default();
        let first = interrupts.sink(false);
        assert!(interrupts.interrupt());
        drop(first);

        let second = interrupts.sink(false);
        assert!(second.send(StreamEvent::Done).await.is_ok());
    }
}
