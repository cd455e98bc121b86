use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entities::{Customer, Order, OrderLine, Payment, Shipment};
use super::errors::OrderError;
use super::state_machine::{ensure_transition, OrderFacts};
use super::totals::{recalculate, Totals};
use super::value_objects::{Address, OrderState};

// ============================================================================
// Order Aggregate - the consistency boundary
// ============================================================================
//
// Order + lines + customer + shipment + payment, always loaded together.
// Commands mutate a loaded aggregate through an `OrderEdit`, which records
// every row it touches. `OrderEdit::finish` recomputes totals from the full
// line set and yields one `OrderChanges` that the store commits atomically.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAggregate {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub customer: Option<Customer>,
    pub shipment: Option<Shipment>,
    pub payment: Option<Payment>,
}

impl OrderAggregate {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            lines: Vec::new(),
            customer: None,
            shipment: None,
            payment: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.order.id
    }

    pub fn state(&self) -> OrderState {
        self.order.state
    }

    pub fn facts(&self) -> OrderFacts {
        OrderFacts {
            state: self.order.state,
            has_customer: self.order.customer_id.is_some(),
            has_shipping_address: self.order.shipping_address.is_some(),
            has_shipment: self.shipment.is_some(),
        }
    }

    pub fn line(&self, line_id: Uuid) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.id == line_id)
    }

    pub fn line_for_variant(&self, variant_id: Uuid) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.variant_id == variant_id)
    }

    /// Whether the stored totals match the line set and shipment.
    pub fn totals_consistent(&self) -> bool {
        let expected = recalculate(&self.lines, self.shipment.as_ref());
        expected
            == Totals {
                subtotal: self.order.subtotal,
                total: self.order.total,
                total_quantity: self.order.total_quantity,
            }
    }

    /// Start recording changes against this snapshot.
    pub fn edit(self) -> OrderEdit {
        OrderEdit {
            expected_version: self.order.version,
            initial_state: self.order.state,
            aggregate: self,
            touched_lines: Vec::new(),
            removed_line_ids: Vec::new(),
            new_customer: false,
            shipment_changed: false,
            payment_added: false,
            stock_decrements: Vec::new(),
        }
    }
}

/// Guarded stock decrement applied at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDecrement {
    pub variant_id: Uuid,
    pub quantity: u32,
}

/// Everything one command writes, committed all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderChanges {
    /// Version the edit was computed from; the store rejects the commit if it moved.
    pub expected_version: i64,
    pub order: Order,
    pub upserted_lines: Vec<OrderLine>,
    pub removed_line_ids: Vec<Uuid>,
    pub new_customer: Option<Customer>,
    pub shipment: Option<Shipment>,
    pub payment: Option<Payment>,
    pub stock_decrements: Vec<StockDecrement>,
}

pub struct OrderEdit {
    aggregate: OrderAggregate,
    expected_version: i64,
    initial_state: OrderState,
    touched_lines: Vec<Uuid>,
    removed_line_ids: Vec<Uuid>,
    new_customer: bool,
    shipment_changed: bool,
    payment_added: bool,
    stock_decrements: Vec<StockDecrement>,
}

impl OrderEdit {
    pub fn aggregate(&self) -> &OrderAggregate {
        &self.aggregate
    }

    /// State of the snapshot the edit started from.
    pub fn initial_state(&self) -> OrderState {
        self.initial_state
    }

    /// Insert or replace a line, keyed by line id.
    pub fn put_line(&mut self, line: OrderLine) {
        let line_id = line.id;
        match self.aggregate.lines.iter_mut().find(|l| l.id == line_id) {
            Some(existing) => *existing = line,
            None => self.aggregate.lines.push(line),
        }
        if !self.touched_lines.contains(&line_id) {
            self.touched_lines.push(line_id);
        }
    }

    pub fn remove_line(&mut self, line_id: Uuid) -> Option<OrderLine> {
        let index = self.aggregate.lines.iter().position(|l| l.id == line_id)?;
        let removed = self.aggregate.lines.remove(index);
        self.touched_lines.retain(|id| *id != line_id);
        self.removed_line_ids.push(line_id);
        Some(removed)
    }

    /// Attach a customer. `is_new` marks a record that must be inserted with this commit.
    pub fn attach_customer(&mut self, customer: Customer, is_new: bool) {
        self.aggregate.order.customer_id = Some(customer.id);
        self.aggregate.customer = Some(customer);
        self.new_customer = is_new;
    }

    pub fn set_shipping_address(&mut self, address: Address) {
        self.aggregate.order.shipping_address = Some(address);
    }

    pub fn set_shipment(&mut self, shipment: Shipment) {
        self.aggregate.order.shipment_id = Some(shipment.id);
        self.aggregate.shipment = Some(shipment);
        self.shipment_changed = true;
    }

    /// Record carrier tracking on the existing shipment. Returns false when there is none.
    pub fn set_tracking(&mut self, tracking_code: String, carrier: String) -> bool {
        match self.aggregate.shipment.as_mut() {
            Some(shipment) => {
                shipment.tracking_code = Some(tracking_code);
                shipment.carrier = Some(carrier);
                self.shipment_changed = true;
                true
            }
            None => false,
        }
    }

    pub fn record_payment(&mut self, payment: Payment) {
        self.aggregate.order.payment_id = Some(payment.id);
        self.aggregate.payment = Some(payment);
        self.payment_added = true;
    }

    pub fn decrement_stock(&mut self, variant_id: Uuid, quantity: u32) {
        self.stock_decrements.push(StockDecrement { variant_id, quantity });
    }

    /// Move to `to` after checking the transition gate against this snapshot.
    pub fn transition(&mut self, to: OrderState) -> Result<(), OrderError> {
        ensure_transition(&self.aggregate.facts(), to)?;
        self.aggregate.order.state = to;
        Ok(())
    }

    pub fn stamp_placed_at(&mut self, at: DateTime<Utc>) {
        if self.aggregate.order.placed_at.is_none() {
            self.aggregate.order.placed_at = Some(at);
        }
    }

    /// Recalculate totals from the full line set and produce the commit payload.
    pub fn finish(mut self) -> (OrderAggregate, OrderChanges) {
        let totals = recalculate(&self.aggregate.lines, self.aggregate.shipment.as_ref());

        let order = &mut self.aggregate.order;
        order.subtotal = totals.subtotal;
        order.total = totals.total;
        order.total_quantity = totals.total_quantity;
        order.updated_at = Utc::now();
        order.version = self.expected_version + 1;

        let upserted_lines = self
            .aggregate
            .lines
            .iter()
            .filter(|line| self.touched_lines.contains(&line.id))
            .cloned()
            .collect();

        let changes = OrderChanges {
            expected_version: self.expected_version,
            order: self.aggregate.order.clone(),
            upserted_lines,
            removed_line_ids: self.removed_line_ids,
            new_customer: self.aggregate.customer.clone().filter(|_| self.new_customer),
            shipment: self.aggregate.shipment.clone().filter(|_| self.shipment_changed),
            payment: self.aggregate.payment.clone().filter(|_| self.payment_added),
            stock_decrements: self.stock_decrements,
        };

        (self.aggregate, changes)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
