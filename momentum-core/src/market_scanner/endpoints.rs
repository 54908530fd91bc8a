//! Static registry of upstream market-data endpoints

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use url::Url;

/// Response layout an endpoint is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeTag {
    /// `{ "pairs": [ { "baseToken": {..}, "priceChange": {..}, "priceUsd": .., "volume": {..} } ] }`
    PairList,
    /// `[ { "id": .., "symbol": .., "priceUsd" | "price": .., .. } ]`
    FlatList,
}

impl ShapeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeTag::PairList => "pair-list",
            ShapeTag::FlatList => "flat-list",
        }
    }
}

impl fmt::Display for ShapeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    label: Cow<'static, str>,
    url: Cow<'static, str>,
    shape: ShapeTag,
}

impl Endpoint {
    pub const fn from_static(label: &'static str, url: &'static str, shape: ShapeTag) -> Self {
        Self {
            label: Cow::Borrowed(label),
            url: Cow::Borrowed(url),
            shape,
        }
    }

    pub fn new(label: impl Into<String>, url: impl Into<String>, shape: ShapeTag) -> Self {
        Self {
            label: Cow::Owned(label.into()),
            url: Cow::Owned(url.into()),
            shape,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn shape(&self) -> ShapeTag {
        self.shape
    }

    /// Parsed form of the URL, used for validation.
    pub fn parsed_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.label, self.shape)
    }
}

/// Default upstream sources, polled in this order every cycle.
pub static DEFAULT_ENDPOINTS: &[Endpoint] = &[
    Endpoint::from_static(
        "dexscreener-ethereum",
        "https://api.dexscreener.com/latest/dex/search?q=ethereum",
        ShapeTag::PairList,
    ),
    Endpoint::from_static(
        "dexscreener-bsc",
        "https://api.dexscreener.com/latest/dex/search?q=bsc",
        ShapeTag::PairList,
    ),
    Endpoint::from_static(
        "dexscreener-polygon",
        "https://api.dexscreener.com/latest/dex/search?q=polygon",
        ShapeTag::PairList,
    ),
    Endpoint::from_static(
        "coingecko-markets-1",
        "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=volume_desc&per_page=250&page=1",
        ShapeTag::FlatList,
    ),
    Endpoint::from_static(
        "coingecko-markets-2",
        "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=volume_desc&per_page=250&page=2",
        ShapeTag::FlatList,
    ),
    Endpoint::from_static(
        "coingecko-markets-3",
        "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=volume_desc&per_page=250&page=3",
        ShapeTag::FlatList,
    ),
    Endpoint::from_static(
        "coinpaprika-tickers",
        "https://api.coinpaprika.com/v1/tickers?limit=500",
        ShapeTag::FlatList,
    ),
];
