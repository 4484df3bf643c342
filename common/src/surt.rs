use lazy_regex::regex;
use url::{Host, Url};

/// Builds the sort-friendly URI key (SURT) used throughout the CDXJ index:
/// reversed host labels joined by commas, a `)`, the path, and the query with
/// its pairs lowercased and sorted.
pub fn surt(mut url: Url) -> String {
    strip_www(&mut url);

    let mut key = String::with_capacity(url.as_str().len());

    if let Some(host) = url.host_str() {
        let mut labels = host.rsplit('.');
        if let Some(first) = labels.next() {
            key.push_str(first);
        }
        for label in labels {
            key.push(',');
            key.push_str(label);
        }
    }

    if let Some(port) = url.port() {
        let mut buffer = itoa::Buffer::new();
        key.push(':');
        key.push_str(buffer.format(port));
    }

    key.push(')');
    key.push_str(url.path());

    if let Some(query) = normalized_query(&mut url) {
        key.push('?');
        key.push_str(&query);
    }

    key
}

fn strip_www(url: &mut Url) {
    if let Some(Host::Domain(domain)) = url.host() {
        if let Some(mat) = regex!(r#"^www\d*\."#).find(domain) {
            let bare = domain[mat.end()..].to_owned();
            let _ = url.set_host(Some(&bare));
        }
    }
}

/// Query pairs lowercased and sorted by key, so equivalent URLs collide.
fn normalized_query(url: &mut Url) -> Option<String> {
    url.query().filter(|query| !query.is_empty())?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            (
                name.into_owned().to_lowercase(),
                value.into_owned().to_lowercase(),
            )
        })
        .collect();
    pairs.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

    url.query_pairs_mut().clear().extend_pairs(&pairs).finish();

    url.query()
        .filter(|query| !query.is_empty())
        .map(str::to_owned)
}
