//! This module stores the column names used across the pipeline. The raw names must be kept in
//! sync with the headers of the upstream source files; the canonical names are what the master
//! and cleaned panels expose.

// Canonical join keys
pub const COUNTRY: &str = "country";
pub const YEAR: &str = "year";
pub const ISO_CODE: &str = "iso_code";

// Raw key columns before normalisation
pub const RAW_ENTITY: &str = "Entity";
pub const RAW_YEAR: &str = "Year";
pub const RAW_ALLOW_LIST_COUNTRY: &str = "Country";
pub const RAW_DROUGHT_COUNTRY: &str = "Drought affected";
pub const RAW_GDP_COUNTRY: &str = "Country Name";

// Indicator columns
pub const DEFORESTATION: &str = "Deforestation";
pub const TEMPERATURE_ANOMALY: &str = "Temperature_anomaly";
pub const ANNUAL_PRECIPITATION: &str = "Annual_precipitation";
pub const CO2: &str = "co2";
pub const CO2_INCLUDING_LAND_USE: &str = "Annual_CO₂_emissions_including_land-use_change";
pub const CO2_FROM_LAND_USE: &str = "Annual_CO₂_emissions_from_land-use_change";
pub const ANNUAL_CO2_EMISSIONS: &str = "Annual_CO₂_emissions";
pub const POPULATION: &str = "population";
pub const GDP: &str = "GDP";
pub const DROUGHT: &str = "Drought";
pub const DEFORESTATION_INTENSITY: &str = "deforestation_intensity";

pub const PER_CAPITA_BUILDINGS: &str = "Per_capita_carbon_dioxide_emissions_from_buildings";
pub const PER_CAPITA_ELECTRICITY_AND_HEAT: &str =
    "Per_capita_carbon_dioxide_emissions_from_electricity_and_heat";
pub const PER_CAPITA_INDUSTRY: &str = "Per_capita_carbon_dioxide_emissions_from_industry";
pub const PER_CAPITA_BUNKER_FUELS: &str = "Per_capita_carbon_dioxide_emissions_from_bunker_fuels";
pub const PER_CAPITA_LAND_USE_CHANGE_AND_FORESTRY: &str =
    "Per_capita_carbon_dioxide_emissions_from_land_use_change_and_forestry";
pub const PER_CAPITA_TRANSPORT: &str = "Per_capita_carbon_dioxide_emissions_from_transport";
pub const PER_CAPITA_MANUFACTURING_AND_CONSTRUCTION: &str =
    "Per_capita_carbon_dioxide_emissions_from_manufacturing_and_construction";
pub const PER_CAPITA_OTHER_FUEL_COMBUSTION: &str =
    "Per_capita_carbon_dioxide_emissions_from_other_fuel_combustion";

// Posterior trace columns
pub const TRACE_MODEL: &str = "model";
pub const TRACE_CHAIN: &str = "chain";
pub const TRACE_DRAW: &str = "draw";
pub const PARAM_INTERCEPT: &str = "intercept";
pub const PARAM_SLOPE: &str = "slope";
pub const PARAM_SLOPE_YEAR: &str = "slope_year";
pub const PARAM_SLOPE_GDP: &str = "slope_gdp";
pub const PARAM_SIGMA: &str = "sigma";
pub const PARAM_NU: &str = "nu";
