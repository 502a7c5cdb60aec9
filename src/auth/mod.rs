mod claims;
mod jwt;
mod seal;
mod store;
mod ticket;

pub use claims::Claims;
pub use jwt::JwtValidator;
pub use seal::{SealError, TicketSealer};
pub use store::{
    create_ticket_store, MemoryTicketStore, RedisTicketStore, TicketStore, TicketStoreError,
};
pub use ticket::{Subject, Ticket, TicketError, TicketIssuer};
