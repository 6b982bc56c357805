//! Soft navigation example - two pages, a persistent header, an exit animation

use async_trait::async_trait;
use dom::Document;
use router::{
    ExitHandler, FetchError, MemoryHistory, PageFetcher, Router, RouterConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct SitePages {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for SitePages {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        // Pretend to be the network
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

const HOME: &str = r#"<html><head><title>Home</title></head><body>
<header persist-id="nav"><a href="/about">About</a></header>
<main>Welcome</main>
</body></html>"#;

const ABOUT: &str = r#"<html><head><title>About us</title></head><body>
<header persist-id="nav"><a href="/">Home</a></header>
<main>About this site</main>
<script>console.log("about")</script>
</body></html>"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut pages = HashMap::new();
    pages.insert("https://site.test/".to_string(), HOME.to_string());
    pages.insert("https://site.test/about".to_string(), ABOUT.to_string());

    let config = RouterConfig::default()
        .with_on_load_route(|url| println!("loaded {}", url))
        .with_on_unload_route(|url| println!("unloaded {}", url));

    let router = Router::new(
        config,
        Document::parse(HOME)?,
        Arc::new(SitePages { pages }),
        Arc::new(MemoryHistory::new("https://site.test/")),
    );

    // Home page script: fade out for 100ms before leaving
    router.use_script(|| {
        Some(ExitHandler::new(|exit| {
            println!("leaving for {}", exit.next_path());
            let control = exit.begin_transition();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                control.finish();
            });
        }))
    });

    let header = {
        let document = router.document();
        let document = document.lock();
        document.find_persistent("nav")?
    };

    let outcome = router.navigate_to("/about").await;
    println!("navigation: {:?}", outcome);

    let document = router.document();
    let document = document.lock();
    println!("title: {}", document.title());
    println!("body: {}", document.inner_html(document.body())?);
    println!(
        "header kept: {}",
        header == document.find_persistent("nav")?
    );

    Ok(())
}
