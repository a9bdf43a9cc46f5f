pub mod cancel_order_command;
pub mod complete_order_command;
pub mod confirm_order_command;
pub mod delete_order_command;
pub mod record_payment_command;
pub mod reverse_payment_command;
pub mod ship_order_command;
pub mod submit_order_command;

pub use cancel_order_command::{CancelOrderCommand, CancelOrderResult};
pub use complete_order_command::{CompleteOrderCommand, CompleteOrderResult};
pub use confirm_order_command::{ConfirmOrderCommand, ConfirmOrderResult};
pub use delete_order_command::{DeleteOrderCommand, DeleteOrderResult};
pub use record_payment_command::{RecordPaymentCommand, RecordPaymentResult};
pub use reverse_payment_command::{ReversePaymentCommand, ReversePaymentResult};
pub use ship_order_command::{ShipOrderCommand, ShipOrderResult};
pub use submit_order_command::{SubmitOrderCommand, SubmitOrderResult};
