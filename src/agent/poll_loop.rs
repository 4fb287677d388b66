use super::{Agent, AgentState, AgentStatus, LoopOutcome, Phase, StopHandle};
use crate::dispatch::{Dispatcher, TransactionProcessor};
use crate::error::AgentError;
use crate::hooks::HookPoint;
use crate::message::{decode_list, InboundMessage, ResponseRecord, TransactionRecord};
use crate::transport::endpoints;
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type InterruptFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Source of interrupt notifications; each call waits for the next one.
pub type InterruptSignal = Arc<dyn Fn() -> InterruptFuture + Send + Sync>;

pub(super) fn ctrl_c() -> InterruptSignal {
    Arc::new(|| -> InterruptFuture { Box::pin(tokio::signal::ctrl_c()) })
}

impl Agent {
    /// Connects to the broker and runs the poll loop until it ends.
    ///
    /// Returns how the loop ended; errors from handlers, the transport or the
    /// dispatcher are returned after the session has been disconnected.
    ///
    /// With `poll.stop_on_interrupt`, the first interrupt requests a stop at
    /// the next tick. A second one abandons the cycle in progress at its
    /// current await point and `start()` returns [`AgentError::Interrupted`].
    pub async fn start(&self) -> Result<LoopOutcome> {
        {
            let mut state = self.state.lock().expect("agent state lock poisoned");
            if *state != AgentState::Stopped {
                return Err(AgentError::AlreadyRunning.into());
            }
            *state = AgentState::Connecting;
        }

        if let Err(e) = self.session.connect().await {
            error!(error = %e, "Failed to connect to broker");
            self.set_state(AgentState::Stopped);
            return Err(e);
        }

        let forced = CancellationToken::new();
        let interrupt = self.config.stop_on_interrupt.then(|| {
            spawn_interrupt_listener(
                Arc::clone(&self.interrupt),
                self.stop.clone(),
                forced.clone(),
            )
        });

        let token = self.stop.current();
        let result = tokio::select! {
            result = self.run(&token) => result,
            _ = forced.cancelled() => Err(anyhow::Error::from(AgentError::Interrupted)),
        };

        if let Some(handle) = interrupt {
            handle.abort();
        }

        self.set_state(AgentState::Stopping);
        let disconnected = self.session.disconnect().await;
        self.stop.reset();
        self.set_state(AgentState::Stopped);

        match (result, disconnected) {
            (Ok(outcome), Ok(())) => {
                info!(outcome = %outcome, "Poll loop ended");
                Ok(outcome)
            }
            (Ok(_), Err(e)) => {
                error!(error = %e, "Failed to disconnect from broker");
                Err(e)
            }
            (Err(e), Ok(())) => {
                error!(error = %e, "Poll loop failed");
                Err(e)
            }
            (Err(e), Err(disconnect_error)) => {
                error!(error = %e, "Poll loop failed");
                error!(error = %disconnect_error, "Failed to disconnect from broker");
                Err(e)
            }
        }
    }

    async fn run(&self, token: &CancellationToken) -> Result<LoopOutcome> {
        let subscribed = self.subscriptions.list_subscriptions().await?.len();
        self.set_state(AgentState::Running);

        let period = self.config.interval();
        info!(
            interval_ms = period.as_millis() as u64,
            subscriptions = subscribed,
            "Poll loop running"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(LoopOutcome::Stopped),
                _ = ticker.tick() => {}
            }

            if let Some(outcome) = self.run_cycle().await? {
                return Ok(outcome);
            }
        }
    }

    /// Runs one poll cycle. `None` means the loop continues.
    async fn run_cycle(&self) -> Result<Option<LoopOutcome>> {
        let cycle = {
            let mut status = self.status.lock().expect("agent status lock poisoned");
            status.last_poll = Some(Utc::now());
            status.cycles += 1;
            status.cycles
        };
        debug!(cycle = cycle, "Poll cycle started");

        // Messages
        if let Some(outcome) = self.declined(HookPoint::PrePollMessages) {
            return Ok(Some(outcome));
        }
        let messages = self.poll_messages().await?;
        if let Some(outcome) = self.declined(HookPoint::PostPollMessages) {
            return Ok(Some(outcome));
        }

        let message_count = messages.len() as u64;
        if !Dispatcher::new(&self.subscriptions, &self.hooks)
            .dispatch(messages)
            .await?
        {
            warn!(cycle = cycle, "Message dispatch halted the poll loop");
            return Ok(Some(LoopOutcome::Halted(Phase::Messages)));
        }
        self.record(|status| status.messages_dispatched += message_count);

        // Transactions
        if let Some(outcome) = self.declined(HookPoint::PreHandleTransactions) {
            return Ok(Some(outcome));
        }
        let records = self.poll_transactions().await?;
        let record_count = records.len() as u64;
        if !TransactionProcessor::new(&self.subscriptions)
            .handle_transactions(records)
            .await?
        {
            warn!(cycle = cycle, "Transaction handler halted the poll loop");
            return Ok(Some(LoopOutcome::Halted(Phase::Transactions)));
        }
        self.record(|status| status.transactions_processed += record_count);
        if let Some(outcome) = self.declined(HookPoint::PostHandleTransactions) {
            return Ok(Some(outcome));
        }

        // Responses to messages this entity sent
        if let Some(outcome) = self.declined(HookPoint::PrePollResponses) {
            return Ok(Some(outcome));
        }
        let responses = self.poll_responses().await?;
        if let Some(outcome) = self.declined(HookPoint::PostPollResponses) {
            return Ok(Some(outcome));
        }
        let delivered = self.responses.dispatch(responses).await? as u64;
        self.record(|status| status.responses_dispatched += delivered);

        debug!(
            cycle = cycle,
            messages = message_count,
            transactions = record_count,
            responses = delivered,
            "Poll cycle finished"
        );
        Ok(None)
    }

    fn declined(&self, point: HookPoint) -> Option<LoopOutcome> {
        if self.hooks.run(point) {
            return None;
        }
        info!(hook = %point, "Hook aborted the poll loop");
        Some(LoopOutcome::Aborted(point))
    }

    fn record(&self, update: impl FnOnce(&mut AgentStatus)) {
        let mut status = self.status.lock().expect("agent status lock poisoned");
        update(&mut *status);
    }

    async fn poll_messages(&self) -> Result<Vec<InboundMessage>> {
        let reply = self.transport.get(endpoints::MESSAGE_LIST).await?;
        Ok(decode_list(endpoints::MESSAGE_LIST, reply, "messages")?)
    }

    async fn poll_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let reply = self.transport.get(endpoints::TRANSACTION_LIST).await?;
        Ok(decode_list(endpoints::TRANSACTION_LIST, reply, "transactions")?)
    }

    async fn poll_responses(&self) -> Result<Vec<ResponseRecord>> {
        let reply = self.transport.get(endpoints::RESPONSE_LIST).await?;
        Ok(decode_list(endpoints::RESPONSE_LIST, reply, "responses")?)
    }
}

/// Turns interrupts into stop requests for the running loop.
///
/// The first interrupt asks for a graceful stop; the next one cancels
/// `forced`, which drops the cycle in progress.
fn spawn_interrupt_listener(
    signal: InterruptSignal,
    stop: StopHandle,
    forced: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = signal().await {
            warn!(error = %e, "Failed to listen for interrupt signal");
            return;
        }
        info!("Interrupt received, stopping after the current cycle");
        stop.stop();

        match signal().await {
            Ok(()) => {
                warn!("Second interrupt received, abandoning the current cycle");
                forced.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt signal"),
        }
    })
}
