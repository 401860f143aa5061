//! Operator control of a running dump: interrupt prompts and termination.

use std::io;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::concurrency::pause::{PauseReason, PauseTx};
use crate::concurrency::shutdown::ShutdownTx;

const CANCEL_PROMPT: &str = "Interrupt received. Cancel the dump? (y/n) ";

/// Process signal relevant to a dump run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Ctrl+C. Asks the operator before cancelling unless running as a daemon.
    Interrupt,
    /// Cancels right away.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Cancel,
    Resume,
}

/// Turns signals into pauses and cancellation.
///
/// An interactive interrupt holds the workers with [`PauseReason::Operator`] while the operator is
/// asked whether to cancel. Cancelling sets the shutdown flag before the pause is released, so
/// resumed workers drain instead of starting new jobs.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ShutdownCoordinator {
    /// Spawns the coordinator loop.
    ///
    /// The prompt is written to `output` and answers are read line by line from `input`. The loop
    /// ends after it cancelled the run, when the signal stream ends, or when stopped.
    pub fn start<S, R, W>(
        signals: S,
        input: R,
        output: W,
        daemon_mode: bool,
        pause_tx: PauseTx,
        shutdown_tx: ShutdownTx,
    ) -> Self
    where
        S: Stream<Item = ControlSignal> + Unpin + Send + 'static,
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let coordinator = CoordinatorLoop {
            signals,
            input,
            output,
            daemon_mode,
            pause_tx,
            shutdown_tx,
            stop_rx,
        };
        let handle = tokio::spawn(coordinator.run());

        Self { stop_tx, handle }
    }

    /// Stops the loop and waits for it. An open prompt is abandoned and its pause released.
    pub async fn stop(self) {
        self.stop_tx.send_replace(true);

        if let Err(err) = self.handle.await {
            warn!(error = %err, "shutdown coordinator task did not finish cleanly");
        }
    }
}

struct CoordinatorLoop<S, R, W> {
    signals: S,
    input: R,
    output: W,
    daemon_mode: bool,
    pause_tx: PauseTx,
    shutdown_tx: ShutdownTx,
    stop_rx: watch::Receiver<bool>,
}

impl<S, R, W> CoordinatorLoop<S, R, W>
where
    S: Stream<Item = ControlSignal> + Unpin + Send + 'static,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        loop {
            let signal = tokio::select! {
                biased;

                _ = self.stop_rx.changed() => return,
                signal = self.signals.next() => signal,
            };

            match signal {
                None => return,
                Some(ControlSignal::Terminate) => {
                    warn!("termination requested, cancelling the dump");
                    self.shutdown_tx.shutdown();

                    return;
                }
                Some(ControlSignal::Interrupt) if self.daemon_mode => {
                    info!("interrupt ignored in daemon mode");
                }
                Some(ControlSignal::Interrupt) => {
                    if self.handle_interrupt().await {
                        return;
                    }
                }
            }
        }
    }

    /// Pauses the workers and asks the operator. Returns whether the loop must end.
    async fn handle_interrupt(&mut self) -> bool {
        self.pause_tx.pause(PauseReason::Operator);
        info!("interrupt received, workers paused until the operator answers");

        let answer = {
            let ask = ask_operator(&mut self.input, &mut self.output);
            tokio::pin!(ask);

            let mut signals_done = false;
            loop {
                tokio::select! {
                    biased;

                    _ = self.stop_rx.changed() => {
                        self.pause_tx.resume(PauseReason::Operator);

                        return true;
                    }
                    signal = self.signals.next(), if !signals_done => match signal {
                        Some(ControlSignal::Terminate) => break Answer::Cancel,
                        Some(ControlSignal::Interrupt) => {}
                        None => signals_done = true,
                    },
                    answer = &mut ask => break answer,
                }
            }
        };

        match answer {
            Answer::Cancel => {
                warn!("dump cancelled by the operator");
                self.shutdown_tx.shutdown();
                self.pause_tx.resume(PauseReason::Operator);

                true
            }
            Answer::Resume => {
                info!("resuming the dump");
                self.pause_tx.resume(PauseReason::Operator);

                false
            }
        }
    }
}

/// Prompts until the operator answers.
///
/// Blank lines are skipped. End of input or an unreadable input counts as a yes.
async fn ask_operator<R, W>(input: &mut R, output: &mut W) -> Answer
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_prompt(output).await;

    let mut line = String::new();
    loop {
        line.clear();

        match input.read_line(&mut line).await {
            Ok(0) => return Answer::Cancel,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "could not read the operator answer, cancelling");
                return Answer::Cancel;
            }
        }

        match line.trim().chars().next() {
            None => continue,
            Some('y' | 'Y') => return Answer::Cancel,
            Some('n' | 'N') => return Answer::Resume,
            Some(_) => write_prompt(output).await,
        }
    }
}

async fn write_prompt<W>(output: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        output.write_all(CANCEL_PROMPT.as_bytes()).await?;
        output.flush().await
    };

    if let Err(err) = written.await {
        warn!(error = %err, "could not write the operator prompt");
    }
}

/// Returns the interrupt and terminate signals of the process as one stream.
#[cfg(unix)]
pub fn process_signals() -> io::Result<impl Stream<Item = ControlSignal> + Unpin + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let interrupts = futures::stream::poll_fn(move |cx| {
        interrupt
            .poll_recv(cx)
            .map(|signal| signal.map(|()| ControlSignal::Interrupt))
    });
    let terminations = futures::stream::poll_fn(move |cx| {
        terminate
            .poll_recv(cx)
            .map(|signal| signal.map(|()| ControlSignal::Terminate))
    });

    Ok(futures::stream::select(interrupts, terminations))
}

/// Starts a coordinator wired to the process signals and the terminal.
#[cfg(unix)]
pub fn start_process_coordinator(
    daemon_mode: bool,
    pause_tx: PauseTx,
    shutdown_tx: ShutdownTx,
) -> io::Result<ShutdownCoordinator> {
    Ok(ShutdownCoordinator::start(
        process_signals()?,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        daemon_mode,
        pause_tx,
        shutdown_tx,
    ))
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::time::Duration;

    use tokio::io::{BufReader, DuplexStream};
    use tokio::sync::mpsc;

    use super::*;
    use crate::concurrency::pause::create_pause_channel;
    use crate::concurrency::shutdown::{cancelled, create_shutdown_channel};

    type SignalStream = Pin<Box<dyn Stream<Item = ControlSignal> + Send>>;

    fn signal_stream() -> (mpsc::UnboundedSender<ControlSignal>, SignalStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        });

        (tx, Box::pin(stream))
    }

    async fn within<F: std::future::Future>(future: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("condition not reached in time")
    }

    struct Harness {
        signals: mpsc::UnboundedSender<ControlSignal>,
        answers: DuplexStream,
        pause_tx: PauseTx,
        shutdown_tx: ShutdownTx,
        coordinator: ShutdownCoordinator,
    }

    fn harness(daemon_mode: bool) -> Harness {
        let (signals, stream) = signal_stream();
        let (answers, input) = tokio::io::duplex(64);
        let (pause_tx, _) = create_pause_channel();
        let (shutdown_tx, _) = create_shutdown_channel();

        let coordinator = ShutdownCoordinator::start(
            stream,
            BufReader::new(input),
            tokio::io::sink(),
            daemon_mode,
            pause_tx.clone(),
            shutdown_tx.clone(),
        );

        Harness {
            signals,
            answers,
            pause_tx,
            shutdown_tx,
            coordinator,
        }
    }

    #[tokio::test]
    async fn declined_prompt_resumes_the_workers() {
        let mut harness = harness(false);
        let mut pause_rx = harness.pause_tx.subscribe();

        harness.signals.send(ControlSignal::Interrupt).unwrap();
        within(pause_rx.wait_for(|state| state.contains(PauseReason::Operator)))
            .await
            .unwrap();

        harness.answers.write_all(b"\nmaybe\nn\n").await.unwrap();
        within(pause_rx.wait_for(|state| !state.is_paused()))
            .await
            .unwrap();

        assert!(!harness.shutdown_tx.is_shutdown());
        harness.coordinator.stop().await;
    }

    #[tokio::test]
    async fn confirmed_prompt_cancels_then_releases_the_pause() {
        let mut harness = harness(false);
        let mut shutdown_rx = harness.shutdown_tx.subscribe();

        harness.signals.send(ControlSignal::Interrupt).unwrap();
        harness.answers.write_all(b"Y\n").await.unwrap();

        within(cancelled(&mut shutdown_rx)).await;
        within(harness.coordinator.handle).await.unwrap();
        assert!(!harness.pause_tx.state().is_paused());
    }

    #[tokio::test]
    async fn end_of_input_counts_as_yes() {
        let (signals, stream) = signal_stream();
        let (pause_tx, _) = create_pause_channel();
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let coordinator = ShutdownCoordinator::start(
            stream,
            BufReader::new(&b""[..]),
            tokio::io::sink(),
            false,
            pause_tx.clone(),
            shutdown_tx,
        );

        signals.send(ControlSignal::Interrupt).unwrap();

        within(cancelled(&mut shutdown_rx)).await;
        within(coordinator.handle).await.unwrap();
        assert!(!pause_tx.state().is_paused());
    }

    #[tokio::test]
    async fn terminate_cancels_without_prompting() {
        let harness = harness(false);
        let mut shutdown_rx = harness.shutdown_tx.subscribe();
        let pause_rx = harness.pause_tx.subscribe();

        harness.signals.send(ControlSignal::Terminate).unwrap();

        within(cancelled(&mut shutdown_rx)).await;
        within(harness.coordinator.handle).await.unwrap();
        assert!(!pause_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn terminate_during_a_prompt_cancels() {
        let harness = harness(false);
        let mut shutdown_rx = harness.shutdown_tx.subscribe();
        let mut pause_rx = harness.pause_tx.subscribe();

        harness.signals.send(ControlSignal::Interrupt).unwrap();
        within(pause_rx.wait_for(|state| state.is_paused()))
            .await
            .unwrap();
        harness.signals.send(ControlSignal::Terminate).unwrap();

        within(cancelled(&mut shutdown_rx)).await;
        within(pause_rx.wait_for(|state| !state.is_paused()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn daemon_mode_ignores_interrupts() {
        let harness = harness(true);
        let mut shutdown_rx = harness.shutdown_tx.subscribe();
        let pause_rx = harness.pause_tx.subscribe();

        harness.signals.send(ControlSignal::Interrupt).unwrap();
        harness.signals.send(ControlSignal::Terminate).unwrap();

        within(cancelled(&mut shutdown_rx)).await;
        assert!(!pause_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn stopping_abandons_an_open_prompt() {
        let harness = harness(false);
        let mut pause_rx = harness.pause_tx.subscribe();

        harness.signals.send(ControlSignal::Interrupt).unwrap();
        within(pause_rx.wait_for(|state| state.is_paused()))
            .await
            .unwrap();

        within(harness.coordinator.stop()).await;

        assert!(!harness.pause_tx.state().is_paused());
        assert!(!harness.shutdown_tx.is_shutdown());
    }
}
