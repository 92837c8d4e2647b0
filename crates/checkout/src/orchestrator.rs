//! Checkout orchestrator.

use std::sync::Arc;
use std::time::Instant;

use common::{CheckoutId, Money, ReservationId};
use inventory::{ProductCatalog, ReservationHandle, ReservationLedger};
use store::{OutboxMessage, OutboxStore, Reservation, ReservationItem, ReservationStore, SagaLog};
use tax::{
    SettingsSource, TaxCalculationResult, TaxCalculator, TaxLineItem, fetch_tax_settings,
};

use crate::error::{CheckoutError, Result};
use crate::events::{CHECKOUT_STARTED_TOPIC, CheckoutEvent, CheckoutStartedMessage};
use crate::request::{CheckoutRequest, CheckoutResult, CustomerIdentity};
use crate::saga::CheckoutSaga;
use crate::services::{
    Cart, CartService, FlatRateShipping, Order, OrderDraft, OrderLine, OrderService,
};

/// Collaborators chosen at startup.
#[derive(Clone)]
pub struct CheckoutCollaborators {
    pub carts: Arc<dyn CartService>,
    pub orders: Arc<dyn OrderService>,
    pub settings: Arc<dyn SettingsSource>,
    pub tax: TaxCalculator,
    pub shipping: FlatRateShipping,
}

/// Drives a checkout: reserve stock, price the cart, create the order.
///
/// Every step is recorded in the durable checkout log. A failure after the
/// reservation releases it again; the original error is always returned.
pub struct CheckoutOrchestrator<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog,
    C: ProductCatalog,
{
    ledger: ReservationLedger<S, C>,
    store: Arc<S>,
    collaborators: CheckoutCollaborators,
}

impl<S, C> Clone for CheckoutOrchestrator<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog,
    C: ProductCatalog,
{
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            collaborators: self.collaborators.clone(),
        }
    }
}

impl<S, C> CheckoutOrchestrator<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog,
    C: ProductCatalog,
{
    pub fn new(ledger: ReservationLedger<S, C>, collaborators: CheckoutCollaborators) -> Self {
        let store = ledger.store().clone();
        Self {
            ledger,
            store,
            collaborators,
        }
    }

    pub fn ledger(&self) -> &ReservationLedger<S, C> {
        &self.ledger
    }

    #[tracing::instrument(skip(self, request), fields(cart_id = %request.cart_id))]
    pub async fn process_checkout(&self, request: CheckoutRequest) -> Result<CheckoutResult> {
        metrics::counter!("checkouts_started_total").increment(1);
        let started = Instant::now();

        let result = self.run(&request).await;

        let outcome = if result.is_ok() { "completed" } else { "failed" };
        metrics::histogram!("checkout_duration_seconds", "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, request: &CheckoutRequest) -> Result<CheckoutResult> {
        // 1. Validate
        let cart = self
            .collaborators
            .carts
            .get_cart(&request.cart_id)
            .await?
            .ok_or_else(|| CheckoutError::CartNotFound(request.cart_id.clone()))?;
        if cart.items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let identity = request.identity().ok_or(CheckoutError::MissingIdentity)?;
        if cart.has_physical_items && request.shipping_address.is_none() {
            return Err(CheckoutError::MissingShippingAddress);
        }

        // 2. Open the log
        let checkout_id = CheckoutId::new();
        let mut saga = CheckoutSaga::new(checkout_id);
        let (user_id, guest_email) = match identity {
            CustomerIdentity::User(id) => (Some(id), None),
            CustomerIdentity::Guest(email) => (None, Some(email)),
        };
        saga.record(
            self.store.as_ref(),
            CheckoutEvent::checkout_started(
                checkout_id,
                &request.cart_id,
                user_id.clone(),
                guest_email.clone(),
            ),
        )
        .await?;
        tracing::info!(%checkout_id, "Checkout started");

        // 3. Reserve
        let items = cart
            .items
            .iter()
            .map(|item| {
                ReservationItem::new(
                    item.product_id.clone(),
                    item.variant_id.clone(),
                    item.quantity,
                )
            })
            .collect();
        let handle = match self.ledger.reserve(items).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::info!(%checkout_id, error = %e, "Checkout aborted");
                if let Err(log_err) = saga
                    .record(self.store.as_ref(), CheckoutEvent::aborted(e.to_string()))
                    .await
                {
                    tracing::error!(%checkout_id, error = %log_err, "Failed to record aborted checkout");
                }
                return Err(e.into());
            }
        };

        // 4. Compensable zone
        let (order, tax_details, shipping_cost) = match self
            .place_order(request, &cart, &handle, user_id, guest_email, &mut saga)
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                self.compensate(&mut saga, handle.reservation_id, &e).await;
                return Err(e);
            }
        };

        // 5. The order exists from here on; failures are logged and left
        //    for the recovery sweep.
        let payment_required = order.total.is_positive();

        if let Err(e) = saga
            .record(
                self.store.as_ref(),
                CheckoutEvent::order_created(&order.id, &order.order_number, order.total),
            )
            .await
        {
            tracing::error!(%checkout_id, error = %e, "Failed to record created order");
        }

        let message = CheckoutStartedMessage {
            checkout_id,
            reservation_id: handle.reservation_id,
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            total: order.total,
            payment_required,
        };
        match OutboxMessage::new(CHECKOUT_STARTED_TOPIC, &message) {
            Ok(message) => {
                if let Err(e) = self.store.enqueue(message).await {
                    tracing::warn!(%checkout_id, error = %e, "Failed to enqueue checkout.started");
                }
            }
            Err(e) => tracing::warn!(%checkout_id, error = %e, "Failed to build checkout.started"),
        }

        if let Err(e) = saga
            .record(self.store.as_ref(), CheckoutEvent::completed())
            .await
        {
            tracing::error!(%checkout_id, error = %e, "Failed to record completed checkout");
        }
        tracing::info!(%checkout_id, order_number = %order.order_number, total = %order.total, "Checkout completed");
        metrics::counter!("checkouts_completed_total").increment(1);

        Ok(CheckoutResult {
            checkout_id,
            payment_required,
            payment_client_secret: payment_required
                .then(|| format!("pi_{}_secret_pending", handle.reservation_id.as_uuid().simple())),
            reservation_id: handle.reservation_id,
            reservation_expires_at: handle.expires_at,
            subtotal: order.subtotal,
            discount: order.discount,
            shipping_cost,
            tax: order.tax,
            tax_details,
            total: order.total,
            order,
        })
    }

    /// The steps whose failure must release the reservation.
    async fn place_order(
        &self,
        request: &CheckoutRequest,
        cart: &Cart,
        handle: &ReservationHandle,
        user_id: Option<String>,
        guest_email: Option<String>,
        saga: &mut CheckoutSaga,
    ) -> Result<(Order, TaxCalculationResult, Money)> {
        saga.record(
            self.store.as_ref(),
            CheckoutEvent::reservation_acquired(handle.reservation_id, handle.expires_at),
        )
        .await?;

        let shipping_cost = self.collaborators.shipping.cost(cart);
        let tax_lines: Vec<TaxLineItem> = cart
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| TaxLineItem {
                id: format!("line-{i}"),
                amount: item.line_total(),
                quantity: item.quantity,
                tax_code: item.tax_code.clone(),
            })
            .collect();
        let settings = fetch_tax_settings(self.collaborators.settings.as_ref()).await;
        let tax_details = self
            .collaborators
            .tax
            .calculate_tax(
                &tax_lines,
                request.shipping_address.as_ref(),
                shipping_cost,
                &settings,
            )
            .await;
        let tax = tax_details.tax_amount;
        let total = (cart.subtotal - cart.discount + shipping_cost + tax).floor_zero();

        let draft = OrderDraft {
            checkout_id: saga.checkout_id(),
            reservation_id: handle.reservation_id,
            cart_id: cart.id.clone(),
            user_id,
            guest_email,
            lines: cart
                .items
                .iter()
                .map(|item| OrderLine {
                    product_id: item.product_id.clone(),
                    variant_id: item.variant_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total: item.line_total(),
                })
                .collect(),
            shipping_address: request.shipping_address.clone(),
            billing_address: request.billing_address.clone(),
            shipping_method: request.shipping_method.clone(),
            payment_method: request.payment_method.clone(),
            coupon_code: request.coupon_code.clone(),
            notes: request.notes.clone(),
            currency: cart.currency.clone(),
            subtotal: cart.subtotal,
            discount: cart.discount,
            shipping_cost,
            tax,
            total,
        };

        let order = self.collaborators.orders.create_order(draft).await?;
        Ok((order, tax_details, shipping_cost))
    }

    async fn compensate(
        &self,
        saga: &mut CheckoutSaga,
        reservation_id: ReservationId,
        cause: &CheckoutError,
    ) {
        let checkout_id = saga.checkout_id();
        tracing::warn!(%checkout_id, %reservation_id, error = %cause, step = "compensate", "Checkout failed after reservation, releasing");
        metrics::counter!("checkout_compensations_total").increment(1);

        if let Err(e) = saga
            .record(
                self.store.as_ref(),
                CheckoutEvent::compensation_started(cause.to_string()),
            )
            .await
        {
            tracing::error!(%checkout_id, error = %e, "Failed to record compensation start");
        }

        let outcome = match self.ledger.cancel(reservation_id).await {
            Ok(_) => CheckoutEvent::compensated(reservation_id),
            Err(e) => {
                tracing::error!(%checkout_id, %reservation_id, error = %e, "Compensation failed, reservation left for expiry");
                metrics::counter!("checkout_compensation_failures_total").increment(1);
                CheckoutEvent::compensation_failed(e.to_string())
            }
        };

        if let Err(e) = saga.record(self.store.as_ref(), outcome).await {
            tracing::error!(%checkout_id, error = %e, "Failed to record compensation outcome");
        }
    }

    /// Commits the reservation once payment has gone through.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, reservation_id: ReservationId) -> Result<Reservation> {
        Ok(self.ledger.confirm(reservation_id).await?)
    }

    pub async fn get_checkout(&self, checkout_id: CheckoutId) -> Result<CheckoutSaga> {
        let entries = self.store.load(checkout_id).await?;
        if entries.is_empty() {
            return Err(CheckoutError::CheckoutNotFound(checkout_id));
        }
        Ok(CheckoutSaga::from_entries(checkout_id, &entries)?)
    }
}
