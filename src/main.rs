//! Searches the Google Places API for places of one type around a point and
//! prints a numbered list of their names and vicinities.

#[tokio::main]
async fn main() {
    nearby_places::run().await;
}
