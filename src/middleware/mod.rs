pub mod ip_filter;

pub use ip_filter::filter_webhook_source;
