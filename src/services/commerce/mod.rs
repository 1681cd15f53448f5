/// Commerce services: carts, pricing, shipping fees and checkout
pub mod cart_service;
pub mod checkout_service;
pub mod pricing_service;
pub mod shipping_config_service;

pub use cart_service::{AddToCartRequest, CartService, CartView, UpdateCartItemRequest};
pub use checkout_service::{CheckoutResult, CheckoutService, CreateOrderRequest};
pub use pricing_service::{PriceBreakdown, PricingService};
pub use shipping_config_service::{
    ShippingConfigService, ShippingConfigView, UpdateShippingConfigRequest,
};
