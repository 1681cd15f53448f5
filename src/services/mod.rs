// Cart, pricing and checkout
pub mod commerce;

// Order reads and payment-state transitions
pub mod orders;
