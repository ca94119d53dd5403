use mockall::mock;
use salon_common::Money;
use salon_engine::gateway::{
    CheckoutRequest,
    CheckoutSession,
    GatewayError,
    GatewayPayment,
    GatewayRefund,
    PaymentGateway,
    RefundInstruction,
};

mock! {
    pub CardGateway {}
    impl PaymentGateway for CardGateway {
        async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;
        async fn confirm(&self, payment_key: &str, order_id: &str, amount: Money) -> Result<GatewayPayment, GatewayError>;
        async fn fetch_status(&self, payment_key: &str) -> Result<GatewayPayment, GatewayError>;
        async fn refund(&self, instruction: &RefundInstruction) -> Result<GatewayRefund, GatewayError>;
    }
}
