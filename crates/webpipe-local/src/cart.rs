//! Cart: in-memory ordered set of added items, deduped by URL.

use std::sync::Mutex;
use webpipe_core::CartItem;

static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

fn fresh_id() -> String {
    let n = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("cart-{n}")
}

/// Outcome of a mutating cart operation: `ok:false` carries a message
/// instead of throwing, per the add/remove contract.
pub struct CartOutcome {
    pub ok: bool,
    pub message: Option<String>,
    pub cart: Vec<CartItem>,
}

#[derive(Default)]
pub struct Cart {
    items: Mutex<Vec<CartItem>>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(items: &[CartItem]) -> Vec<CartItem> {
        items.to_vec()
    }

    pub fn add(
        &self,
        name: String,
        url: String,
        price: f64,
        currency: String,
        source: String,
        image_url: Option<String>,
        category: Option<String>,
    ) -> CartOutcome {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if items.iter().any(|i| i.url == url) {
            return CartOutcome {
                ok: false,
                message: Some(format!("item with url {url} is already in the cart")),
                cart: Self::snapshot(&items),
            };
        }
        let item = CartItem { id: fresh_id(), name, url, price, currency, source, image_url, category };
        items.push(item);
        CartOutcome { ok: true, message: None, cart: Self::snapshot(&items) }
    }

    pub fn list(&self) -> Vec<CartItem> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Self::snapshot(&items)
    }

    pub fn remove(&self, id: &str) -> CartOutcome {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return CartOutcome {
                ok: false,
                message: Some(format!("no cart item with id {id}")),
                cart: Self::snapshot(&items),
            };
        }
        CartOutcome { ok: true, message: None, cart: Self::snapshot(&items) }
    }

    pub fn clear(&self) -> Vec<CartItem> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.clear();
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(cart: &Cart, url: &str) -> CartOutcome {
        cart.add("name".to_string(), url.to_string(), 9.99, "USD".to_string(), "example.com".to_string(), None, None)
    }

    #[test]
    fn add_then_list_contains_item() {
        let cart = Cart::new();
        let outcome = add(&cart, "https://example.com/p/1");
        assert!(outcome.ok);
        assert_eq!(cart.list().len(), 1);
        assert_eq!(cart.list()[0].url, "https://example.com/p/1");
    }

    #[test]
    fn duplicate_url_is_rejected_without_mutation() {
        let cart = Cart::new();
        add(&cart, "https://example.com/p/1");
        let second = add(&cart, "https://example.com/p/1");
        assert!(!second.ok);
        assert!(second.message.is_some());
        assert_eq!(cart.list().len(), 1);
    }

    #[test]
    fn remove_unknown_id_is_rejected() {
        let cart = Cart::new();
        let outcome = cart.remove("nope");
        assert!(!outcome.ok);
    }

    #[test]
    fn remove_known_id_shrinks_cart() {
        let cart = Cart::new();
        add(&cart, "https://example.com/p/1");
        let id = cart.list()[0].id.clone();
        let outcome = cart.remove(&id);
        assert!(outcome.ok);
        assert!(cart.list().is_empty());
    }

    #[test]
    fn clear_empties_unconditionally() {
        let cart = Cart::new();
        add(&cart, "https://example.com/p/1");
        add(&cart, "https://example.com/p/2");
        cart.clear();
        assert!(cart.list().is_empty());
    }
}
