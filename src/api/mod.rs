//! Clients for the exchange and the messaging backend.

mod exchange;
pub mod rpc;
mod telegram;

pub use exchange::{
    BinanceClient, Exchange, Market, OrderFill, OrderKind, OrderOpts, OrderSide, Ticker,
};
pub use rpc::{CallOptions, MigrateKind, ResilientClient, RpcError, RpcTransport};
pub use telegram::{pump_updates, MtprotoHttpTransport};
