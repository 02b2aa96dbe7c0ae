//! Station code listing.

use trainmcp_agent::StationCodeMapper;

use crate::AppContext;

pub fn run(keyword: Option<&str>, ctx: &AppContext) {
    let mapper = StationCodeMapper::with_custom_file(ctx.config.city_codes_file.as_deref());

    let cities = match keyword {
        Some(keyword) => mapper.search_city(keyword),
        None => mapper.available_cities(),
    };

    if cities.is_empty() {
        println!("No matching cities.");
        return;
    }

    for city in cities {
        if let Some(code) = mapper.get_code(city) {
            println!("{}\t{}", city, code);
        }
    }
}
