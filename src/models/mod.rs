// Canonical data model for the procurement core
pub mod normalize;
pub mod purchase_order;

pub use purchase_order::{
    resize_unit_slots, AdditionalCost, AdditionalCostCategory, OrderStatus, PaymentStatus,
    PricingRecord, PurchaseOrder, PurchaseOrderLine, StorageLocation, UnitRecord, WarrantyWindow,
};
