// Service discovery over mDNS/DNS-SD
//
// The browser turns network announcements into `DiscoveryEvent`s; the feed
// applies them to the registry. The advertiser is the other side: it puts a
// backend on the network.

pub mod advertisement;
pub mod advertiser;
pub mod browser;
pub mod feed;

pub use advertisement::{Advertisement, AdvertisementError};
pub use advertiser::{find_available_priority, next_free_priority, Advertiser, AdvertiserConfig};
pub use browser::{discover, MdnsBrowser};
pub use feed::{DiscoveryEvent, DiscoveryFeed, StalenessSweep};
