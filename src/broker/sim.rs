// =============================================================================
// SimBroker — deterministic in-process broker gateway
// =============================================================================
//
// Backs dry-run and paper modes, and drives reproducible pipeline tests.
// Order outcomes can be scripted per call (`script_retcodes`), so broker
// failure protocols (requotes, invalid stops) are exercised without a broker.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::market_data::Bar;
use crate::types::Side;

use super::{
    AccountInfo, BrokerError, BrokerGateway, Deal, DealEntry, OrderAction, OrderRequest,
    OrderResult, Position, Retcode, SymbolInfo, Tick,
};

pub struct SimBroker {
    symbols: HashMap<String, SymbolInfo>,
    ticks: HashMap<String, Tick>,
    rates: HashMap<String, Vec<Bar>>,
    equity: Decimal,
    balance: Decimal,
    positions: Vec<Position>,
    deals: Vec<Deal>,
    scripted: VecDeque<Retcode>,
    next_ticket: u64,
    clock: DateTime<Utc>,
    /// Synthetic spread applied by `update_from_bar`, in points.
    default_spread_points: Decimal,
}

impl SimBroker {
    pub fn new(symbols: HashMap<String, SymbolInfo>, equity: Decimal) -> Self {
        Self {
            symbols,
            ticks: HashMap::new(),
            rates: HashMap::new(),
            equity,
            balance: equity,
            positions: Vec::new(),
            deals: Vec::new(),
            scripted: VecDeque::new(),
            next_ticket: 1000,
            clock: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            default_spread_points: dec!(4),
        }
    }

    // -------------------------------------------------------------------------
    // Simulation controls
    // -------------------------------------------------------------------------

    /// Queue retcodes for upcoming `order_send` calls; once drained, sends
    /// succeed with `Done`.
    pub fn script_retcodes(&mut self, retcodes: impl IntoIterator<Item = Retcode>) {
        self.scripted.extend(retcodes);
    }

    pub fn set_tick(&mut self, symbol: &str, bid: Decimal, ask: Decimal, ts: DateTime<Utc>) {
        self.ticks
            .insert(symbol.to_string(), Tick { bid, ask, ts });
        self.clock = ts;
    }

    /// Derive a tick from a bar close using the configured synthetic spread.
    pub fn update_from_bar(&mut self, symbol: &str, bar: &Bar) {
        let point = self
            .symbols
            .get(symbol)
            .map(|s| s.point)
            .unwrap_or(dec!(0.00001));
        let half_spread = self.default_spread_points * point / Decimal::TWO;
        self.set_tick(
            symbol,
            bar.close - half_spread,
            bar.close + half_spread,
            bar.timestamp,
        );
    }

    pub fn set_equity(&mut self, equity: Decimal) {
        self.equity = equity;
    }

    pub fn set_rates(&mut self, symbol: &str, timeframe: &str, bars: Vec<Bar>) {
        self.rates.insert(rates_key(symbol, timeframe), bars);
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Force-close a position at a price with a broker-style comment, as a
    /// stop or target fill would. Used to simulate SL/TP hits.
    pub fn force_close(
        &mut self,
        ticket: u64,
        price: Decimal,
        comment: &str,
        time: DateTime<Utc>,
    ) -> Option<Deal> {
        let index = self.positions.iter().position(|p| p.ticket == ticket)?;
        let position = self.positions.remove(index);

        let info = self.symbols.get(&position.symbol)?;
        let direction = match position.side {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        };
        let profit = (price - position.entry_price)
            * direction
            * position.volume
            * info.contract_size;

        self.equity += profit;
        self.balance += profit;

        let deal = Deal {
            ticket: self.alloc_ticket(),
            position_id: position.ticket,
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            volume: position.volume,
            price,
            profit,
            time,
            comment: comment.to_string(),
            entry: DealEntry::Out,
        };
        self.deals.push(deal.clone());
        Some(deal)
    }

    fn alloc_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

fn rates_key(symbol: &str, timeframe: &str) -> String {
    format!("{symbol}@{timeframe}")
}

impl BrokerGateway for SimBroker {
    fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        // Simplified margin model: all of equity is free unless positions are
        // open; margin level is generously high in simulation.
        let margin_level = if self.positions.is_empty() {
            None
        } else {
            Some(dec!(1000))
        };
        Ok(AccountInfo {
            equity: self.equity,
            balance: self.balance,
            free_margin: self.equity,
            margin_level,
        })
    }

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        self.symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError(format!("unknown symbol {symbol}")))
    }

    fn tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        self.ticks
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError(format!("no tick for {symbol}")))
    }

    fn rates_from(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let bars = self
            .rates
            .get(&rates_key(symbol, timeframe))
            .cloned()
            .unwrap_or_default();
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }

    fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        Ok(self
            .positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    fn history_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, BrokerError> {
        Ok(self
            .deals
            .iter()
            .filter(|d| d.time >= from && d.time <= to)
            .cloned()
            .collect())
    }

    fn order_send(&mut self, request: &OrderRequest) -> Result<OrderResult, BrokerError> {
        let retcode = self.scripted.pop_front().unwrap_or(Retcode::Done);

        debug!(
            symbol = %request.symbol,
            action = ?request.action,
            retcode = retcode.code(),
            "sim order_send"
        );

        if retcode != Retcode::Done {
            return Ok(OrderResult {
                retcode,
                retcode_description: retcode.description().to_string(),
                ticket: None,
            });
        }

        match request.action {
            OrderAction::Deal => {
                let ticket = self.alloc_ticket();
                self.positions.push(Position {
                    ticket,
                    symbol: request.symbol.clone(),
                    side: request.side,
                    volume: request.volume,
                    entry_price: request.price,
                    sl: request.sl,
                    tp: request.tp,
                    magic: request.magic,
                    opened_at: self.clock,
                });
                self.deals.push(Deal {
                    ticket,
                    position_id: ticket,
                    symbol: request.symbol.clone(),
                    side: request.side,
                    volume: request.volume,
                    price: request.price,
                    profit: Decimal::ZERO,
                    time: self.clock,
                    comment: request.comment.clone(),
                    entry: DealEntry::In,
                });
                Ok(OrderResult {
                    retcode: Retcode::Done,
                    retcode_description: Retcode::Done.description().to_string(),
                    ticket: Some(ticket),
                })
            }
            OrderAction::Sltp => {
                let position_ticket = request
                    .position
                    .ok_or_else(|| BrokerError("SLTP modify without position ticket".into()))?;
                match self
                    .positions
                    .iter_mut()
                    .find(|p| p.ticket == position_ticket)
                {
                    Some(position) => {
                        position.sl = request.sl;
                        position.tp = request.tp;
                        Ok(OrderResult {
                            retcode: Retcode::Done,
                            retcode_description: Retcode::Done.description().to_string(),
                            ticket: Some(position_ticket),
                        })
                    }
                    None => Ok(OrderResult {
                        retcode: Retcode::Other(10013),
                        retcode_description: "Unknown position".to_string(),
                        ticket: None,
                    }),
                }
            }
        }
    }

    fn close_position(&mut self, ticket: u64, comment: &str) -> Result<OrderResult, BrokerError> {
        let price = match self.positions.iter().find(|p| p.ticket == ticket) {
            Some(position) => match self.ticks.get(&position.symbol) {
                Some(tick) => match position.side {
                    Side::Buy => tick.bid,
                    Side::Sell => tick.ask,
                },
                None => position.entry_price,
            },
            // Already closed: idempotent success.
            None => {
                return Ok(OrderResult {
                    retcode: Retcode::Done,
                    retcode_description: "Position already closed".to_string(),
                    ticket: Some(ticket),
                })
            }
        };

        let clock = self.clock;
        self.force_close(ticket, price, comment, clock);
        Ok(OrderResult {
            retcode: Retcode::Done,
            retcode_description: Retcode::Done.description().to_string(),
            ticket: Some(ticket),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn eurusd_info() -> SymbolInfo {
        SymbolInfo {
            point: dec!(0.00001),
            digits: 5,
            contract_size: dec!(100000),
            volume_min: dec!(0.01),
            volume_step: dec!(0.01),
            volume_max: dec!(100),
            stops_level: 0,
            min_stop_distance: dec!(0.0001),
            max_stop_distance: None,
            sl_hard_floor_points: 10,
            margin_initial: Decimal::ZERO,
        }
    }

    fn broker() -> SimBroker {
        let mut symbols = HashMap::new();
        symbols.insert("EURUSD".to_string(), eurusd_info());
        SimBroker::new(symbols, dec!(10000))
    }

    fn buy_request(volume: Decimal) -> OrderRequest {
        OrderRequest {
            action: OrderAction::Deal,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume,
            price: dec!(1.10080),
            sl: dec!(1.09995),
            tp: dec!(1.10208),
            deviation: 10,
            magic: 7,
            comment: "meridian_fvg".to_string(),
            type_filling: Default::default(),
            position: None,
        }
    }

    #[test]
    fn successful_send_opens_position_and_records_in_deal() {
        let mut broker = broker();
        let result = broker.order_send(&buy_request(dec!(0.29))).unwrap();
        assert!(result.ok());
        assert_eq!(broker.open_position_count(), 1);

        let positions = broker.positions(Some("EURUSD")).unwrap();
        assert_eq!(positions[0].volume, dec!(0.29));
        assert_eq!(positions[0].sl, dec!(1.09995));
    }

    #[test]
    fn scripted_retcodes_are_served_in_order() {
        let mut broker = broker();
        broker.script_retcodes([Retcode::InvalidStops, Retcode::Requote]);

        let first = broker.order_send(&buy_request(dec!(0.1))).unwrap();
        assert_eq!(first.retcode, Retcode::InvalidStops);
        let second = broker.order_send(&buy_request(dec!(0.1))).unwrap();
        assert_eq!(second.retcode, Retcode::Requote);
        // Script drained: back to Done.
        let third = broker.order_send(&buy_request(dec!(0.1))).unwrap();
        assert_eq!(third.retcode, Retcode::Done);
    }

    #[test]
    fn force_close_produces_out_deal_with_profit() {
        let mut broker = broker();
        let result = broker.order_send(&buy_request(dec!(0.29))).unwrap();
        let ticket = result.ticket.unwrap();

        let close_time = Utc.with_ymd_and_hms(2025, 1, 1, 4, 0, 0).unwrap();
        let deal = broker
            .force_close(ticket, dec!(1.10208), "tp hit", close_time)
            .unwrap();

        assert_eq!(deal.entry, DealEntry::Out);
        assert_eq!(deal.position_id, ticket);
        // (1.10208 - 1.10080) * 0.29 * 100000 = 37.12
        assert_eq!(deal.profit, dec!(37.1200000));
        assert_eq!(broker.open_position_count(), 0);

        let history = broker
            .history_deals(close_time - chrono::Duration::hours(1), close_time)
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn close_of_unknown_ticket_is_idempotent_success() {
        let mut broker = broker();
        let result = broker.close_position(99999, "rotation").unwrap();
        assert!(result.ok());
    }

    #[test]
    fn sltp_modify_updates_position() {
        let mut broker = broker();
        let ticket = broker
            .order_send(&buy_request(dec!(0.1)))
            .unwrap()
            .ticket
            .unwrap();

        let mut modify = buy_request(dec!(0.1));
        modify.action = OrderAction::Sltp;
        modify.position = Some(ticket);
        modify.sl = dec!(1.09900);
        modify.tp = dec!(1.10300);

        let result = broker.order_send(&modify).unwrap();
        assert!(result.ok());

        let position = &broker.positions(Some("EURUSD")).unwrap()[0];
        assert_eq!(position.sl, dec!(1.09900));
        assert_eq!(position.tp, dec!(1.10300));
    }

    #[test]
    fn update_from_bar_sets_spread_around_close() {
        let mut broker = broker();
        let bar = Bar::new(
            dec!(1.1000),
            dec!(1.1010),
            dec!(1.0990),
            dec!(1.10080),
            dec!(100),
            Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap(),
        )
        .unwrap();
        broker.update_from_bar("EURUSD", &bar);
        let tick = broker.tick("EURUSD").unwrap();
        assert_eq!(tick.ask - tick.bid, dec!(0.00004));
        assert_eq!((tick.ask + tick.bid) / Decimal::TWO, dec!(1.10080));
    }
}
