//! Static HTML pages: a landing page with a lookup form and an order detail
//! page that fetches from the JSON API client-side.

use axum::{extract::Path, response::Html, routing::get, Router};

pub fn router() -> Router {
    Router::new()
        .route("/", get(home_page))
        .route("/orders/{order_id}", get(order_page))
}

async fn home_page() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Order Service</title></head>
<body>
  <h1>Order Service</h1>
  <form onsubmit="location.href='/orders/'+encodeURIComponent(document.getElementById('uid').value);return false">
    <label for="uid">Order UID</label>
    <input id="uid" name="uid" placeholder="b563feb7b2b84b6test">
    <button type="submit">Find order</button>
  </form>
</body>
</html>"#,
    )
}

async fn order_page(Path(order_id): Path<String>) -> Html<String> {
    let escaped: String = order_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Order {escaped}</title></head>
<body>
  <h1>Order {escaped}</h1>
  <pre id="order">loading…</pre>
  <script>
    fetch('/api/v1/orders/{escaped}')
      .then(r => r.json())
      .then(body => document.getElementById('order').textContent = JSON.stringify(body, null, 2))
      .catch(() => document.getElementById('order').textContent = 'failed to load order');
  </script>
</body>
</html>"#
    ))
}
