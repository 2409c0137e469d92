//! Trade lifecycle engine: the state machine driving one trade end to end.
//!
//! WATCHING -> CONFIRMING -> BUYING -> ARMED -> EXITING
//!
//! Exactly one position exists at a time. The engine owns it exclusively:
//! messages and poll ticks are processed on a single control loop, and while
//! a position is open (or a confirmation is pending) inbound messages are
//! discarded unprocessed.

use std::fmt;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, Market, OrderFill, OrderKind, OrderOpts, OrderSide};
use crate::models::{ActivePosition, InboundMessage};
use crate::trading::{pricing, SignalMatcher, TradeConfig};

/// Engine states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Watching,
    Confirming,
    Buying,
    Armed,
    Exiting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Watching => "WATCHING",
            LifecycleState::Confirming => "CONFIRMING",
            LifecycleState::Buying => "BUYING",
            LifecycleState::Armed => "ARMED",
            LifecycleState::Exiting => "EXITING",
        };
        f.write_str(name)
    }
}

/// Line-based operator prompt.
#[async_trait]
pub trait Confirm: Send {
    async fn ask(&mut self, question: &str) -> Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn ask(&mut self, question: &str) -> Result<String> {
        let mut out = tokio::io::stdout();
        out.write_all(question.as_bytes()).await?;
        out.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(line)
    }
}

/// What the trade ended as, for the final log line.
#[derive(Debug)]
pub struct TradeOutcome {
    pub base: String,
    pub purchase_price: Decimal,
    pub exit_price: Decimal,
    /// None when the liquidation sell itself failed
    pub sell_order: Option<OrderFill>,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: bought at {}, stopped out at {} ({}%)",
            self.base,
            self.purchase_price,
            self.exit_price,
            pricing::current_profit_percent(self.exit_price, self.purchase_price).round_dp(2),
        )?;
        if self.sell_order.is_none() {
            write!(f, " [liquidation sell FAILED, manual intervention required]")?;
        }
        Ok(())
    }
}

/// The trade lifecycle engine.
pub struct Bot<E, C> {
    config: TradeConfig,
    exchange: E,
    confirm: C,
    matcher: SignalMatcher,
    messages: mpsc::Receiver<InboundMessage>,
    state: LifecycleState,
}

impl<E: Exchange, C: Confirm> Bot<E, C> {
    pub fn new(
        config: TradeConfig,
        exchange: E,
        confirm: C,
        messages: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let matcher = SignalMatcher::new(&config.channel_allow_list);
        Self {
            config,
            exchange,
            confirm,
            matcher,
            messages,
            state: LifecycleState::Watching,
        }
    }

    /// Run one full trade lifecycle: watch for a signal, confirm, buy, arm,
    /// monitor, and exit on stop-loss. Unrecoverable failures (failed buy,
    /// failed arming, garbled confirmation) propagate as errors.
    pub async fn run(mut self) -> Result<TradeOutcome> {
        let markets: Vec<Market> = self
            .exchange
            .load_markets()
            .await
            .context("failed to load exchange markets")?
            .into_iter()
            .filter(|m| m.quote == self.config.quote_asset)
            .collect();

        if markets.is_empty() {
            bail!("no markets quoted in {}", self.config.quote_asset);
        }

        let candidates: Vec<String> = markets.iter().map(|m| m.base.clone()).collect();
        info!(
            quote = %self.config.quote_asset,
            candidates = candidates.len(),
            simulate = self.config.simulate,
            "watching for listings"
        );

        let market = loop {
            let base = self.watch(&candidates).await?;

            self.set_state(LifecycleState::Confirming);
            if self.confirm_trade(&base).await? {
                // The base came out of the candidate list, so a market exists.
                break markets
                    .iter()
                    .find(|m| m.base == base)
                    .context("matched base has no market")?
                    .clone();
            }

            info!(base = %base, "trade declined, resuming watch");
            self.set_state(LifecycleState::Watching);
        };

        let mut position = self.buy(&market).await?;
        self.arm(&mut position).await?;
        self.monitor(position).await
    }

    fn set_state(&mut self, next: LifecycleState) {
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn order_opts(&self) -> OrderOpts {
        OrderOpts {
            test: self.config.simulate,
        }
    }

    /// Consume the message stream until a candidate base matches.
    async fn watch(&mut self, candidates: &[String]) -> Result<String> {
        while let Some(message) = self.messages.recv().await {
            if !self.matcher.accepts_chat(message.source_chat_id) {
                debug!(
                    chat_id = message.source_chat_id,
                    "chat not in allow-list, dropping message"
                );
                continue;
            }

            if let Some(base) = self.matcher.find_match(&message.text, candidates) {
                info!(
                    base = %base,
                    chat_id = message.source_chat_id,
                    "signal matched"
                );
                return Ok(base.to_string());
            }
        }

        bail!("message stream closed while watching")
    }

    /// Ask the operator. Yes buys, no resumes watching, anything else is
    /// treated as fatal.
    async fn confirm_trade(&mut self, base: &str) -> Result<bool> {
        let question = format!(
            "Buy {} with {} {}? (yes/no): ",
            base, self.config.quote_spend_amount, self.config.quote_asset
        );
        let answer = self.confirm.ask(&question).await?;
        let answer = answer.trim();

        if answer.eq_ignore_ascii_case("yes") || answer.eq_ignore_ascii_case("y") {
            Ok(true)
        } else if answer.eq_ignore_ascii_case("no") || answer.eq_ignore_ascii_case("n") {
            Ok(false)
        } else {
            bail!("unrecognized confirmation answer: {answer:?}");
        }
    }

    /// Market-buy the base. A failed entry is fatal and never retried; the
    /// market has moved since the quote and a blind retry risks unintended
    /// exposure.
    async fn buy(&mut self, market: &Market) -> Result<ActivePosition> {
        self.set_state(LifecycleState::Buying);

        let last = self
            .exchange
            .fetch_ticker(&market.symbol)
            .await
            .context("failed to fetch ticker for buy sizing")?
            .last;
        let amount = pricing::buy_amount(
            self.config.quote_spend_amount,
            last,
            self.config.slippage_tolerance,
        );

        info!(symbol = %market.symbol, last = %last, amount = %amount, "placing market buy");

        let fill = self
            .exchange
            .create_order(
                &market.symbol,
                OrderKind::Market,
                OrderSide::Buy,
                amount,
                None,
                &self.order_opts(),
            )
            .await
            .context("market buy failed")?;

        info!(
            order_id = %fill.id,
            price = %fill.price,
            amount = %fill.amount,
            "buy filled"
        );

        Ok(ActivePosition::new(
            market.base.clone(),
            market.symbol.clone(),
            fill.price,
            fill.amount,
            self.config.trailing_stop_percent,
        ))
    }

    /// Book every profit-target limit sell concurrently. All-or-nothing:
    /// any failed submission leaves the position unprotected and is fatal.
    async fn arm(&mut self, position: &mut ActivePosition) -> Result<()> {
        let opts = self.order_opts();
        let submissions = self.config.profit_targets.iter().map(|target| {
            let amount = pricing::sell_amount(position.purchase_amount, target.sell_percent);
            let price = pricing::target_price(position.purchase_price, target.profit_percent);
            self.exchange.create_order(
                &position.symbol,
                OrderKind::Limit,
                OrderSide::Sell,
                amount,
                Some(price),
                &opts,
            )
        });

        let mut booked = Vec::new();
        let mut failed = None;
        for (target, result) in self.config.profit_targets.iter().zip(join_all(submissions).await)
        {
            match result {
                Ok(fill) => {
                    info!(
                        order_id = %fill.id,
                        price = %fill.price,
                        amount = %fill.amount,
                        "profit target booked"
                    );
                    booked.push(fill.id);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        profit_percent = %target.profit_percent,
                        "profit target booking failed"
                    );
                    failed = Some(e);
                }
            }
        }

        if let Some(e) = failed {
            if self.config.cancel_on_partial_failure && !booked.is_empty() {
                if let Err(cancel_err) = self.exchange.cancel_all_orders(&position.symbol).await {
                    warn!(error = %cancel_err, "failed to cancel partially booked targets");
                }
            }
            return Err(e.context("profit-target booking failed, position is not protected"));
        }

        position.target_order_ids = booked;
        self.set_state(LifecycleState::Armed);
        info!(
            initial_stop = %position.stop.initial,
            targets = position.target_order_ids.len(),
            "position armed"
        );

        Ok(())
    }

    /// Trailing-stop poll loop. Each tick fetches the latest price, exits
    /// when it touches the stop (boundary inclusive), otherwise ratchets the
    /// stop upward when the price allows. Messages arriving while armed are
    /// discarded.
    async fn monitor(&mut self, mut position: ActivePosition) -> Result<TradeOutcome> {
        let mut poll = interval(self.config.poll_interval());

        loop {
            let discarded = tokio::select! {
                _ = poll.tick() => None,
                Some(message) = self.messages.recv() => Some(message),
            };

            if let Some(message) = discarded {
                debug!(
                    chat_id = message.source_chat_id,
                    "position active, discarding message"
                );
                continue;
            }

            let last = self
                .exchange
                .fetch_ticker(&position.symbol)
                .await
                .context("failed to fetch ticker while armed")?
                .last;

            info!(
                last = %last,
                stop = %position.stop.current,
                profit_pct = %pricing::current_profit_percent(last, position.purchase_price).round_dp(2),
                locked_in_pct = %pricing::locked_in_profit_percent(
                    position.stop.initial,
                    position.stop.current,
                    self.config.trailing_stop_percent,
                ).round_dp(2),
                "tick"
            );

            if position.stop.is_triggered(last) {
                return self.exit(position, last).await;
            }

            let candidate = pricing::stop_price(last, self.config.trailing_stop_percent);
            if position.stop.ratchet(candidate) {
                info!(stop = %position.stop.current, "trailing stop raised");
            }
        }
    }

    /// Liquidation path: cancel everything, market-sell the full purchased
    /// amount. Errors here are logged but never block termination; the
    /// position is assumed compromised either way.
    async fn exit(&mut self, position: ActivePosition, last: Decimal) -> Result<TradeOutcome> {
        self.set_state(LifecycleState::Exiting);
        warn!(
            last = %last,
            stop = %position.stop.current,
            "stop triggered, liquidating position"
        );

        if let Err(e) = self.exchange.cancel_all_orders(&position.symbol).await {
            error!(error = %e, "failed to cancel open orders during exit");
        }

        let sell_order = match self
            .exchange
            .create_order(
                &position.symbol,
                OrderKind::Market,
                OrderSide::Sell,
                position.purchase_amount,
                None,
                &self.order_opts(),
            )
            .await
        {
            Ok(fill) => {
                info!(
                    order_id = %fill.id,
                    price = %fill.price,
                    amount = %fill.amount,
                    "stop-loss sell placed"
                );
                Some(fill)
            }
            Err(e) => {
                error!(error = %e, "stop-loss sell failed, manual intervention required");
                None
            }
        };

        Ok(TradeOutcome {
            base: position.base,
            purchase_price: position.purchase_price,
            exit_price: last,
            sell_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Ticker;
    use crate::trading::ProfitTarget;
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct PlacedOrder {
        symbol: String,
        kind: OrderKind,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        test: bool,
    }

    #[derive(Default)]
    struct MockState {
        markets: Vec<Market>,
        prices: Mutex<VecDeque<Decimal>>,
        last_price: Mutex<Decimal>,
        orders: Mutex<Vec<PlacedOrder>>,
        cancels: Mutex<Vec<String>>,
        /// Limit-sell submissions at or past this index fail
        fail_limit_sells_from: Option<usize>,
    }

    #[derive(Clone)]
    struct MockExchange(Arc<MockState>);

    impl MockExchange {
        fn new(markets: Vec<(&str, &str, &str)>, prices: Vec<Decimal>) -> Self {
            Self(Arc::new(MockState {
                markets: markets
                    .into_iter()
                    .map(|(symbol, base, quote)| Market {
                        symbol: symbol.to_string(),
                        base: base.to_string(),
                        quote: quote.to_string(),
                    })
                    .collect(),
                prices: Mutex::new(prices.into_iter().collect()),
                ..Default::default()
            }))
        }

        fn orders(&self) -> Vec<PlacedOrder> {
            self.0.orders.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Exchange for MockExchange {
        async fn load_markets(&self) -> Result<Vec<Market>> {
            Ok(self.0.markets.clone())
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<Ticker> {
            let last = self
                .0
                .prices
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("price script exhausted"))?;
            *self.0.last_price.lock().unwrap() = last;
            Ok(Ticker { last })
        }

        async fn create_order(
            &self,
            symbol: &str,
            kind: OrderKind,
            side: OrderSide,
            amount: Decimal,
            price: Option<Decimal>,
            opts: &OrderOpts,
        ) -> Result<OrderFill> {
            let mut orders = self.0.orders.lock().unwrap();
            let order_index = orders.len();
            let limit_sells_so_far = orders
                .iter()
                .filter(|o| o.kind == OrderKind::Limit && o.side == OrderSide::Sell)
                .count();
            orders.push(PlacedOrder {
                symbol: symbol.to_string(),
                kind,
                side,
                amount,
                price,
                test: opts.test,
            });
            drop(orders);

            if kind == OrderKind::Limit && side == OrderSide::Sell {
                if let Some(from) = self.0.fail_limit_sells_from {
                    if limit_sells_so_far >= from {
                        return Err(anyhow!("Account has insufficient balance"));
                    }
                }
            }

            let fill_price = price.unwrap_or(*self.0.last_price.lock().unwrap());
            Ok(OrderFill {
                id: format!("order-{order_index}"),
                amount,
                price: fill_price,
            })
        }

        async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
            self.0.cancels.lock().unwrap().push(symbol.to_string());
            Ok(())
        }
    }

    struct MockConfirm {
        answers: VecDeque<&'static str>,
    }

    impl MockConfirm {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
            }
        }
    }

    #[async_trait]
    impl Confirm for MockConfirm {
        async fn ask(&mut self, _question: &str) -> Result<String> {
            self.answers
                .pop_front()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("no scripted answer left"))
        }
    }

    fn test_config() -> TradeConfig {
        TradeConfig {
            quote_asset: "BTC".to_string(),
            quote_spend_amount: dec!(1000),
            trailing_stop_percent: dec!(0.1),
            poll_interval_ms: 500,
            slippage_tolerance: Decimal::ZERO,
            profit_targets: vec![
                ProfitTarget { profit_percent: dec!(0.05), sell_percent: dec!(0.5) },
                ProfitTarget { profit_percent: dec!(0.1), sell_percent: dec!(0.5) },
            ],
            simulate: false,
            channel_allow_list: Vec::new(),
            cancel_on_partial_failure: false,
        }
    }

    fn message(text: &str, chat: i64) -> InboundMessage {
        InboundMessage {
            text: text.to_string(),
            source_chat_id: chat,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_to_stop_out() {
        // Buy at 100; ticks 95 (no ratchet), 120 (ratchet to 108), 100 (trigger).
        let exchange = MockExchange::new(
            vec![("XYZBTC", "XYZ", "BTC")],
            vec![dec!(100), dec!(95), dec!(120), dec!(100)],
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(message("XYZ just listed!", 1)).await.unwrap();
        // A second signal while the position is active must be discarded.
        tx.send(message("XYZ again!", 1)).await.unwrap();

        let bot = Bot::new(test_config(), exchange.clone(), MockConfirm::new(&["yes"]), rx);
        let outcome = bot.run().await.unwrap();

        assert_eq!(outcome.base, "XYZ");
        assert_eq!(outcome.purchase_price, dec!(100));
        assert_eq!(outcome.exit_price, dec!(100));
        assert!(outcome.sell_order.is_some());

        let orders = exchange.orders();
        assert_eq!(orders.len(), 4);

        // Market buy sized from the quote spend: 1000 / 100 = 10
        assert_eq!(orders[0].kind, OrderKind::Market);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].amount, dec!(10));

        // Profit targets: sell 5 @ 105 and 5 @ 110
        assert_eq!(orders[1].kind, OrderKind::Limit);
        assert_eq!(orders[1].amount, dec!(5.0));
        assert_eq!(orders[1].price, Some(dec!(105.00)));
        assert_eq!(orders[2].amount, dec!(5.0));
        assert_eq!(orders[2].price, Some(dec!(110.0)));

        // Liquidation sells the full purchased amount after cancelling
        assert_eq!(orders[3].kind, OrderKind::Market);
        assert_eq!(orders[3].side, OrderSide::Sell);
        assert_eq!(orders[3].amount, dec!(10));
        assert_eq!(*exchange.0.cancels.lock().unwrap(), vec!["XYZBTC"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_confirmation_resumes_watching() {
        let exchange = MockExchange::new(
            vec![("AAABTC", "AAA", "BTC"), ("BBBBTC", "BBB", "BTC")],
            vec![dec!(10), dec!(9)],
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(message("AAA listed", 1)).await.unwrap();
        tx.send(message("BBB listed", 1)).await.unwrap();

        let bot = Bot::new(
            test_config(),
            exchange.clone(),
            MockConfirm::new(&["no", "yes"]),
            rx,
        );
        let outcome = bot.run().await.unwrap();

        // First signal declined; the trade runs against the second base.
        assert_eq!(outcome.base, "BBB");
        assert_eq!(exchange.orders()[0].symbol, "BBBBTC");
    }

    #[tokio::test]
    async fn test_garbled_confirmation_is_fatal() {
        let exchange = MockExchange::new(vec![("AAABTC", "AAA", "BTC")], vec![]);
        let (tx, rx) = mpsc::channel(8);
        tx.send(message("AAA listed", 1)).await.unwrap();

        let bot = Bot::new(test_config(), exchange.clone(), MockConfirm::new(&["maybe"]), rx);
        let err = bot.run().await.unwrap_err();

        assert!(err.to_string().contains("unrecognized confirmation answer"));
        assert!(exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_filters_before_matching() {
        let mut config = test_config();
        config.channel_allow_list = vec![42];

        let exchange = MockExchange::new(
            vec![("AAABTC", "AAA", "BTC"), ("BBBBTC", "BBB", "BTC")],
            vec![dec!(10), dec!(9)],
        );
        let (tx, rx) = mpsc::channel(8);
        // Matching text from a chat outside the allow-list must be dropped.
        tx.send(message("AAA listed", 7)).await.unwrap();
        tx.send(message("BBB listed", 42)).await.unwrap();

        let bot = Bot::new(config, exchange.clone(), MockConfirm::new(&["yes"]), rx);
        let outcome = bot.run().await.unwrap();

        assert_eq!(outcome.base, "BBB");
    }

    #[tokio::test]
    async fn test_partial_booking_failure_is_fatal() {
        let mut state = MockState {
            markets: vec![Market {
                symbol: "XYZBTC".to_string(),
                base: "XYZ".to_string(),
                quote: "BTC".to_string(),
            }],
            prices: Mutex::new(vec![dec!(100)].into_iter().collect()),
            ..Default::default()
        };
        state.fail_limit_sells_from = Some(1);
        let exchange = MockExchange(Arc::new(state));

        let (tx, rx) = mpsc::channel(8);
        tx.send(message("XYZ listed", 1)).await.unwrap();

        let bot = Bot::new(test_config(), exchange.clone(), MockConfirm::new(&["yes"]), rx);
        let err = bot.run().await.unwrap_err();

        assert!(err.to_string().contains("not protected"));
        // Default behavior leaves the successfully booked target in place.
        assert!(exchange.0.cancels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_booking_reconciliation_hook_cancels() {
        let mut config = test_config();
        config.cancel_on_partial_failure = true;

        let mut state = MockState {
            markets: vec![Market {
                symbol: "XYZBTC".to_string(),
                base: "XYZ".to_string(),
                quote: "BTC".to_string(),
            }],
            prices: Mutex::new(vec![dec!(100)].into_iter().collect()),
            ..Default::default()
        };
        state.fail_limit_sells_from = Some(1);
        let exchange = MockExchange(Arc::new(state));

        let (tx, rx) = mpsc::channel(8);
        tx.send(message("XYZ listed", 1)).await.unwrap();

        let bot = Bot::new(config, exchange.clone(), MockConfirm::new(&["yes"]), rx);
        let err = bot.run().await.unwrap_err();

        assert!(err.to_string().contains("not protected"));
        assert_eq!(*exchange.0.cancels.lock().unwrap(), vec!["XYZBTC"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_flags_every_order_as_test() {
        let mut config = test_config();
        config.simulate = true;

        let exchange = MockExchange::new(
            vec![("XYZBTC", "XYZ", "BTC")],
            vec![dec!(100), dec!(90)],
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(message("XYZ listed", 1)).await.unwrap();

        let bot = Bot::new(config, exchange.clone(), MockConfirm::new(&["yes"]), rx);
        let outcome = bot.run().await.unwrap();

        // 90 <= initial stop 90: boundary equality triggers immediately.
        assert_eq!(outcome.exit_price, dec!(90));
        assert!(exchange.orders().iter().all(|o| o.test));
    }
}
