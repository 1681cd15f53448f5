/// Catalog, cart, voucher and shipping entities read by the pricing engine.
pub mod cart;
pub mod cart_item;
pub mod product;
pub mod product_media;
pub mod shipping_config;
pub mod user;
pub mod user_type;
pub mod voucher;
pub mod voucher_product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_media::{Entity as ProductMedia, Model as ProductMediaModel};
pub use shipping_config::{Entity as ShippingConfig, Model as ShippingConfigModel};
pub use user::{Entity as User, Model as UserModel};
pub use user_type::{Entity as UserType, Model as UserTypeModel};
pub use voucher::{DiscountType, Entity as Voucher, Model as VoucherModel, VoucherScope};
pub use voucher_product::{Entity as VoucherProduct, Model as VoucherProductModel};
