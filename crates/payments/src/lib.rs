//! Payment records and payment-gateway adapters.
//!
//! [`PaymentGateway`] is the seam between settlement and the outside world.
//! Each provider keeps its own field canonicalization and signing inside its
//! adapter; callers only see normalized [`GatewayNotification`]s.

pub mod error;
pub mod gateway;
pub mod mock;
pub mod payment;
pub mod payos;
pub mod registry;
pub mod signature;
pub mod zalopay;

pub use error::{GatewayError, PaymentError};
pub use gateway::{
    CallbackAck, CheckoutItem, CheckoutRequest, CheckoutSession, GatewayNotification,
    GatewayStatus, PaymentGateway,
};
pub use mock::ScriptedGateway;
pub use payment::{Payment, PaymentMethod, PaymentParts, PaymentStatus, Provider};
pub use payos::{PayOsConfig, PayOsGateway};
pub use registry::GatewayRegistry;
pub use zalopay::{ZaloPayConfig, ZaloPayGateway};
