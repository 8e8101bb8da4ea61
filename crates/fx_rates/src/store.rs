use models::{PortfolioProperty, PortfolioPropertyKind};

/// Facts already extracted from the report being parsed.
pub trait PropertyStore {
    /// Value text of the first property whose kind satisfies `predicate`.
    fn find_first(&self, predicate: &dyn Fn(&PortfolioPropertyKind) -> bool) -> Option<String>;
}

impl PropertyStore for [PortfolioProperty] {
    fn find_first(&self, predicate: &dyn Fn(&PortfolioPropertyKind) -> bool) -> Option<String> {
        self.iter()
            .find(|p| predicate(&p.property))
            .map(|p| p.value.clone())
    }
}

impl PropertyStore for Vec<PortfolioProperty> {
    fn find_first(&self, predicate: &dyn Fn(&PortfolioPropertyKind) -> bool) -> Option<String> {
        self.as_slice().find_first(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn property(kind: PortfolioPropertyKind, value: &str) -> PortfolioProperty {
        PortfolioProperty {
            portfolio: "1234".to_string(),
            property: kind,
            value: value.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_find_first_takes_first_match() {
        let store = vec![
            property(PortfolioPropertyKind::TotalAssets, "1000"),
            property(PortfolioPropertyKind::exchange_rate_for("USD"), "73.8757"),
            property(PortfolioPropertyKind::exchange_rate_for("USD"), "80"),
        ];
        let usd = PortfolioPropertyKind::exchange_rate_for("usd");

        assert_eq!(store.find_first(&|k| *k == usd).as_deref(), Some("73.8757"));
        assert_eq!(
            store.find_first(&|k| *k == PortfolioPropertyKind::exchange_rate_for("EUR")),
            None
        );
    }
}
