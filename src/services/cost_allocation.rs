//! Landed-cost allocation and per-unit profitability.
//!
//! The engine converts line costs into the base currency, spreads the shared
//! additional-cost pool across the receiving batch as a flat per-unit share,
//! and derives selling price, markup and profit per line. All math runs at
//! full `Decimal` precision; rounding happens at commit/display time only.

use rust_decimal::Decimal;

use crate::models::{AdditionalCost, PricingRecord};

/// Pure pricing computation over one receiving batch.
#[derive(Clone, Debug)]
pub struct CostAllocationEngine {
    base_currency: String,
}

impl CostAllocationEngine {
    pub fn new(base_currency: impl Into<String>) -> Self {
        Self {
            base_currency: base_currency.into(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Converts an amount from the order currency into the base currency.
    ///
    /// Identity when the currencies match. A missing rate is a degraded-mode
    /// fallback, not an error: the amount passes through unchanged.
    pub fn convert_to_base_currency(
        &self,
        amount: Decimal,
        order_currency: &str,
        exchange_rate: Option<Decimal>,
    ) -> Decimal {
        if order_currency == self.base_currency {
            return amount;
        }
        match exchange_rate {
            Some(rate) => amount * rate,
            None => amount,
        }
    }

    /// Redistributes the shared cost pool across the batch.
    ///
    /// `perUnitShare = totalAdditionalCost / totalUnits`, where `totalUnits`
    /// counts only lines with a positive receiving quantity. Every line in
    /// the batch carries the same per-unit share, so a line receiving five
    /// units carries five times the share in absolute terms. Must be re-run
    /// on every mutation of the pool or of any receiving quantity.
    pub fn allocate_shared_costs<F>(
        &self,
        records: &mut [PricingRecord],
        additional_costs: &[AdditionalCost],
        quantity_of: F,
    ) where
        F: Fn(&PricingRecord) -> i32,
    {
        let total_additional: Decimal = additional_costs.iter().map(|c| c.amount).sum();
        let total_units: i64 = records
            .iter()
            .map(|r| quantity_of(r) as i64)
            .filter(|q| *q > 0)
            .sum();

        let per_unit_share = if total_units > 0 {
            total_additional / Decimal::from(total_units)
        } else {
            Decimal::ZERO
        };

        for record in records.iter_mut() {
            record.allocated_additional_cost = if quantity_of(record) > 0 {
                per_unit_share
            } else {
                Decimal::ZERO
            };
            record.total_unit_cost = record.unit_cost + record.allocated_additional_cost;
            Self::recompute_derived(record);
        }
    }

    /// Sets an explicit selling price and recomputes markup and profit.
    pub fn set_selling_price(&self, record: &mut PricingRecord, price: Decimal) {
        record.selling_price = price;
        Self::recompute_derived(record);
    }

    /// Sets a markup percentage and recomputes the selling price and profit.
    pub fn set_markup_percent(&self, record: &mut PricingRecord, pct: Decimal) {
        record.selling_price =
            record.total_unit_cost * (Decimal::ONE + pct / Decimal::ONE_HUNDRED);
        record.markup_percent = pct;
        record.profit_per_unit = record.selling_price - record.total_unit_cost;
    }

    /// Applies one markup percentage to every line, overriding any selling
    /// price set previously.
    pub fn apply_bulk_markup(&self, records: &mut [PricingRecord], pct: Decimal) {
        for record in records.iter_mut() {
            self.set_markup_percent(record, pct);
        }
    }

    // Markup and profit always derive from the current selling price and
    // total unit cost. A zero-cost line yields 0% markup by convention.
    fn recompute_derived(record: &mut PricingRecord) {
        record.profit_per_unit = record.selling_price - record.total_unit_cost;
        record.markup_percent = if record.total_unit_cost.is_zero() {
            Decimal::ZERO
        } else {
            record.profit_per_unit / record.total_unit_cost * Decimal::ONE_HUNDRED
        };
    }
}
