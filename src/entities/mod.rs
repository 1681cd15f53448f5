pub mod commerce;
pub mod order;
pub mod order_item;

pub use order::{Entity as Order, Model as OrderModel, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
