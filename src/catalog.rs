//! Static registries of check-in places and marketplace products.

use rustc_hash::FxHashMap;

use crate::types::{whole, Coordinates, Place, PlaceCategory, Product, ProductCategory, Stroops};

pub static PLACES: &[Place] = &[
    Place {
        id: 1,
        name: "Plaza de Armas de Cusco",
        description: "Historic heart of the imperial city, framed by colonial architecture",
        location: Coordinates::new(-13.516754, -71.978516),
        radius_m: Some(200.0),
        category: PlaceCategory::Historical,
        image: "/nft-plaza-armas.png",
    },
    Place {
        id: 2,
        name: "Qoricancha - Templo del Sol",
        description: "The most important Inca temple, dedicated to the Sun god",
        location: Coordinates::new(-13.519722, -71.975556),
        radius_m: Some(200.0),
        category: PlaceCategory::Historical,
        image: "/nft-qoricancha.png",
    },
];

pub static PRODUCTS: &[Product] = &[
    Product {
        id: 1,
        name: "Tour Guiado Machu Picchu",
        description: "Full-day tour with a certified guide, transport and lunch included",
        image: "/marketplace-tour.jpg",
        seller: "GMERCHANT1XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX",
        seller_name: "Inca Tours SAC",
        seller_slot: 0,
        price: whole(50),
        discount_price: whole(30),
        discount_tokens: whole(5000),
        category: ProductCategory::Tours,
    },
    Product {
        id: 2,
        name: "Artesania de Alpaca",
        description: "Hand-woven poncho in 100% natural alpaca wool, traditional Cusco design",
        image: "/marketplace-poncho.jpg",
        seller: "GMERCHANT2XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX",
        seller_name: "Artesanias del Valle",
        seller_slot: 1,
        price: whole(20),
        discount_price: whole(12),
        discount_tokens: whole(2000),
        category: ProductCategory::Crafts,
    },
    Product {
        id: 3,
        name: "Cena en Restaurante Local",
        description: "Tasting menu of Cusco cuisine: ceviche, lomo saltado, chicha morada and dessert",
        image: "/marketplace-food.jpg",
        seller: "GMERCHANT3XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX",
        seller_name: "Restaurante Pachapapa",
        seller_slot: 2,
        price: whole(15),
        discount_price: whole(10),
        discount_tokens: whole(1500),
        category: ProductCategory::Food,
    },
];

pub fn place(id: u32) -> Option<&'static Place> {
    PLACES.iter().find(|p| p.id == id)
}

pub fn product(id: u32) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.id == id)
}

/// Discounted native price -> loyalty-token cost.
///
/// Purchase history uses this to guess whether a payment was a discounted
/// purchase. Any price not listed here is classified as full price.
pub fn discount_price_table() -> &'static FxHashMap<Stroops, Stroops> {
    static TABLE: std::sync::OnceLock<FxHashMap<Stroops, Stroops>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        PRODUCTS
            .iter()
            .map(|p| (p.discount_price, p.discount_tokens))
            .collect()
    })
}
