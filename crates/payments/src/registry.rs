use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::gateway::PaymentGateway;
use crate::payment::Provider;

/// Configured gateways, looked up by provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.provider(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| GatewayError::NotConfigured(format!("{provider} is not configured")))
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.gateways.keys().copied().collect();
        providers.sort();
        providers
    }
}

impl core::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedGateway;

    #[test]
    fn lookup_by_provider() {
        let registry =
            GatewayRegistry::new().with(Arc::new(ScriptedGateway::new(Provider::PayOs, "s")));

        assert_eq!(registry.providers(), vec![Provider::PayOs]);
        assert!(registry.get(Provider::PayOs).is_ok());
        assert!(matches!(
            registry.get(Provider::ZaloPay),
            Err(GatewayError::NotConfigured(_))
        ));
    }
}
