//! Scripts injected into or evaluated on the scraping page.

/// Returns the full markup of the currently loaded page.
pub const PAGE_MARKUP: &str = "document.documentElement.outerHTML";

/// Fingerprint countermeasures registered before every document load.
///
/// Covers the checks the interstitial challenge is known to probe: the
/// `navigator.webdriver` flag, empty plugin/language lists, and the absence
/// of `window.chrome.runtime` under CDP-driven Chromium.
pub const STEALTH: &str = r#"
(() => {
    try {
        Object.defineProperty(Navigator.prototype, 'webdriver', {
            get: () => undefined,
            configurable: true,
        });
    } catch (e) {}
    try {
        Object.defineProperty(Navigator.prototype, 'languages', {
            get: () => ['en-US', 'en'],
            configurable: true,
        });
    } catch (e) {}
    try {
        Object.defineProperty(Navigator.prototype, 'plugins', {
            get: () => [1, 2, 3, 4, 5],
            configurable: true,
        });
    } catch (e) {}

    if (!window.chrome) {
        window.chrome = {};
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: function () {
                return { onDisconnect: { addListener: function () {} } };
            },
            sendMessage: function () {},
        };
    }

    delete window.__puppeteer;
    delete window.__playwright;
})();
"#;

/// Build the in-context request for one page of listing results.
///
/// The request runs inside the page's script environment so it inherits the
/// session's cookies and TLS identity. The form body is the site's
/// reverse-engineered internal contract; the constant fields (`tag`, `type`,
/// `le`, `ty`, `myarray`) are sent verbatim as the site's own front-end does.
pub fn listing_request(endpoint: &str, order: &str, offset: u32, limit: u32) -> String {
    format!(
        r#"(async () => {{
    const body = `offset={offset}&limit={limit}&tag=null&type=ranking&order={order}&le=1000&ty=p6&myarray=[]&offset_int={offset}`;
    const resp = await fetch('{endpoint}', {{
        method: 'POST',
        headers: {{ 'Content-Type': 'application/x-www-form-urlencoded' }},
        body,
    }});
    return await resp.text();
}})()"#
    )
}
