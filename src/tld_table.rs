use once_cell::sync::Lazy;
use std::collections::HashMap;

// Seed RDAP base URLs for the most popular TLDs (covers the bulk of real
// import traffic). Anything missing here is resolved once per process via
// the IANA bootstrap registry. Base URLs end in '/' so the router can
// append "domain/{name}" directly.
pub static SEED_RDAP_SERVERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();

    // Verisign registries
    map.insert("com", "https://rdap.verisign.com/com/v1/");
    map.insert("net", "https://rdap.verisign.com/net/v1/");
    map.insert("tv", "https://rdap.verisign.com/tv/v1/");
    map.insert("cc", "https://rdap.verisign.com/cc/v1/");
    map.insert("name", "https://rdap.verisign.com/name/v1/");

    // Public Interest Registry
    map.insert("org", "https://rdap.publicinterestregistry.org/rdap/");

    // Identity Digital portfolio
    map.insert("info", "https://rdap.identitydigital.services/rdap/");
    map.insert("io", "https://rdap.identitydigital.services/rdap/");
    map.insert("ai", "https://rdap.identitydigital.services/rdap/");
    map.insert("live", "https://rdap.identitydigital.services/rdap/");
    map.insert("life", "https://rdap.identitydigital.services/rdap/");
    map.insert("world", "https://rdap.identitydigital.services/rdap/");
    map.insert("email", "https://rdap.identitydigital.services/rdap/");
    map.insert("news", "https://rdap.identitydigital.services/rdap/");

    // Google registry
    map.insert("app", "https://www.registry.google/rdap/");
    map.insert("dev", "https://www.registry.google/rdap/");
    map.insert("page", "https://www.registry.google/rdap/");

    // CentralNic-operated new gTLDs
    map.insert("xyz", "https://rdap.centralnic.com/xyz/");
    map.insert("online", "https://rdap.centralnic.com/online/");
    map.insert("site", "https://rdap.centralnic.com/site/");
    map.insert("store", "https://rdap.centralnic.com/store/");
    map.insert("tech", "https://rdap.centralnic.com/tech/");
    map.insert("space", "https://rdap.centralnic.com/space/");
    map.insert("website", "https://rdap.centralnic.com/website/");
    map.insert("fun", "https://rdap.centralnic.com/fun/");

    // Registry-hosted nic endpoints
    map.insert("top", "https://rdap.nic.top/");
    map.insert("shop", "https://rdap.nic.shop/");
    map.insert("blog", "https://rdap.nic.blog/");
    map.insert("club", "https://rdap.nic.club/");
    map.insert("vip", "https://rdap.nic.vip/");
    map.insert("cloud", "https://rdap.nic.cloud/");
    map.insert("me", "https://rdap.nic.me/");
    map.insert("co", "https://rdap.nic.co/");
    map.insert("us", "https://rdap.nic.us/");

    // Major ccTLD registries with RDAP service
    map.insert("uk", "https://rdap.nominet.uk/uk/");
    map.insert("de", "https://rdap.denic.de/");
    map.insert("fr", "https://rdap.nic.fr/");
    map.insert("nl", "https://rdap.sidn.nl/");
    map.insert("eu", "https://rdap.eurid.eu/");
    map.insert("ca", "https://rdap.ca.fury.ca/rdap/");
    map.insert("au", "https://rdap.auda.org.au/");
    map.insert("in", "https://rdap.registry.in/");
    map.insert("br", "https://rdap.registro.br/");
    map.insert("ch", "https://rdap.nic.ch/");
    map.insert("li", "https://rdap.nic.ch/");

    map
});

// WHOIS servers for the fallback path. Keyed by last label, same as the
// RDAP seed map.
pub static SEED_WHOIS_SERVERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();

    map.insert("com", "whois.verisign-grs.com");
    map.insert("net", "whois.verisign-grs.com");
    map.insert("tv", "whois.nic.tv");
    map.insert("cc", "ccwhois.verisign-grs.com");
    map.insert("org", "whois.pir.org");
    map.insert("info", "whois.nic.info");
    map.insert("io", "whois.nic.io");
    map.insert("ai", "whois.nic.ai");
    map.insert("app", "whois.nic.google");
    map.insert("dev", "whois.nic.google");
    map.insert("page", "whois.nic.google");
    map.insert("xyz", "whois.nic.xyz");
    map.insert("online", "whois.nic.online");
    map.insert("site", "whois.nic.site");
    map.insert("store", "whois.nic.store");
    map.insert("tech", "whois.nic.tech");
    map.insert("top", "whois.nic.top");
    map.insert("shop", "whois.nic.shop");
    map.insert("blog", "whois.nic.blog");
    map.insert("club", "whois.nic.club");
    map.insert("vip", "whois.nic.vip");
    map.insert("cloud", "whois.nic.cloud");
    map.insert("me", "whois.nic.me");
    map.insert("co", "whois.nic.co");
    map.insert("us", "whois.nic.us");
    map.insert("uk", "whois.nic.uk");
    map.insert("de", "whois.denic.de");
    map.insert("fr", "whois.nic.fr");
    map.insert("nl", "whois.domain-registry.nl");
    map.insert("eu", "whois.eu");
    map.insert("ca", "whois.cira.ca");
    map.insert("au", "whois.auda.org.au");
    map.insert("in", "whois.registry.in");
    map.insert("br", "whois.registro.br");
    map.insert("ch", "whois.nic.ch");
    map.insert("li", "whois.nic.li");

    map
});
