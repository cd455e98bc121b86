use uuid::Uuid;

use super::OrderCommandHandler;
use crate::domain::order::{
    ensure_can_perform, Address, CommandError, Customer, CustomerInput, Email, OrderAction, OrderAggregate, OrderError,
};

impl OrderCommandHandler {
    /// Attach a customer by email, creating the record when none exists yet.
    pub async fn add_customer(&self, order_id: Uuid, input: CustomerInput) -> Result<OrderAggregate, CommandError> {
        let email = Email::parse(&input.email).ok_or_else(|| OrderError::InvalidEmail(input.email.clone()))?;

        self.retry_conflicts("add_customer", move || {
            self.try_add_customer(order_id, email.clone(), input.clone())
        })
        .await
    }

    async fn try_add_customer(
        &self,
        order_id: Uuid,
        email: Email,
        input: CustomerInput,
    ) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::AddCustomer)?;

        let (customer, is_new) = match self.store.find_customer_by_email(&email).await? {
            Some(existing) if !existing.enabled => {
                return Err(OrderError::CustomerDisabled(email.to_string()).into());
            }
            Some(existing) => (existing, false),
            None => (
                Customer {
                    id: Uuid::new_v4(),
                    email,
                    first_name: input.first_name,
                    last_name: input.last_name,
                    phone: input.phone,
                    enabled: true,
                },
                true,
            ),
        };

        let customer_id = customer.id;
        let mut edit = aggregate.edit();
        edit.attach_customer(customer, is_new);

        let aggregate = self.commit(edit).await?;
        tracing::info!(order_id = %order_id, customer_id = %customer_id, created = is_new, "Customer attached");
        Ok(aggregate)
    }

    /// Store the destination address. Its country must exist and be enabled.
    pub async fn add_shipping_address(&self, order_id: Uuid, address: Address) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("add_shipping_address", move || {
            self.try_add_shipping_address(order_id, address.clone())
        })
        .await
    }

    async fn try_add_shipping_address(&self, order_id: Uuid, address: Address) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;

        let country = self
            .store
            .find_country_by_code(&address.country_code)
            .await?
            .filter(|country| country.enabled)
            .ok_or_else(|| OrderError::CountryNotFound(address.country_code.clone()))?;

        ensure_can_perform(&aggregate.facts(), OrderAction::AddShippingAddress)?;

        let mut edit = aggregate.edit();
        edit.set_shipping_address(address);

        let aggregate = self.commit(edit).await?;
        tracing::info!(order_id = %order_id, country = %country.code, "Shipping address set");
        Ok(aggregate)
    }
}
