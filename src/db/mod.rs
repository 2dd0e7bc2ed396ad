pub mod canvases;
pub mod clients;
pub mod connection;
pub mod expenses;
pub(crate) mod migrations;
pub mod notes;
pub mod products;
pub mod quotations;
pub mod saved_reports;
pub mod sections;
pub mod settings;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod transactions;

pub use connection::{DbPool, init_db, wipe_all};
pub use sections::{add_section, delete_section, get_section, list_sections,
    list_sections_with_product_counts, update_section};
#[allow(unused_imports)]
pub use products::{NewProduct, add_product, delete_product, get_product, list_products,
    list_products_in_section, update_product};
pub use settings::{get_all_settings, get_setting, set_setting};
pub use transactions::{NewTransaction, RentalTerms, add_transaction, delete_transaction,
    get_transaction, list_transactions, monthly_revenue, record_installment_payment};
